//! In-memory ledger used by the workflow tests
//!
//! Mutations are applied to a copy of the state and swapped in only when every
//! step succeeded, mirroring a database transaction.

use super::{check_approval, check_quantity, ensure_pending, Ledger, RequestScope, WorkflowError};
use crate::models::{BloodRequest, BloodStock, BloodType, CreateBloodRequest, RequestStatus};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct State {
    stocks: HashMap<BloodType, BloodStock>,
    requests: HashMap<Uuid, BloodRequest>,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
    /// Fail the stock write of the next approval after the request was updated
    fail_stock_write: Mutex<bool>,
}

impl MemoryLedger {
    /// Ledger with one zero-bag stock row per blood type
    pub fn seeded() -> Self {
        let now = Utc::now();
        let stocks = BloodType::ALL
            .into_iter()
            .map(|blood_type| {
                (
                    blood_type,
                    BloodStock {
                        blood_type,
                        bag_count: 0,
                        updated_at: now,
                    },
                )
            })
            .collect();
        Self {
            state: Mutex::new(State {
                stocks,
                requests: HashMap::new(),
            }),
            fail_stock_write: Mutex::new(false),
        }
    }

    pub async fn stock(&self, blood_type: BloodType) -> Option<BloodStock> {
        self.state.lock().await.stocks.get(&blood_type).cloned()
    }

    pub async fn request(&self, id: Uuid) -> Option<BloodRequest> {
        self.state.lock().await.requests.get(&id).cloned()
    }

    pub async fn remove_stock(&self, blood_type: BloodType) {
        self.state.lock().await.stocks.remove(&blood_type);
    }

    pub async fn fail_next_stock_write(&self) {
        *self.fail_stock_write.lock().await = true;
    }
}

impl Ledger for MemoryLedger {
    async fn list_stocks(&self) -> Result<Vec<BloodStock>, WorkflowError> {
        let state = self.state.lock().await;
        let mut stocks: Vec<BloodStock> = state.stocks.values().cloned().collect();
        stocks.sort_by_key(|s| s.blood_type);
        Ok(stocks)
    }

    async fn set_stock_quantity(
        &self,
        blood_type: BloodType,
        bag_count: i32,
        _actor_id: Uuid,
    ) -> Result<(i32, BloodStock), WorkflowError> {
        check_quantity(bag_count)?;
        let mut state = self.state.lock().await;
        let stock = state
            .stocks
            .get_mut(&blood_type)
            .ok_or_else(|| WorkflowError::NotFound(format!("Stock for blood type {}", blood_type)))?;
        let previous = std::mem::replace(&mut stock.bag_count, bag_count);
        stock.updated_at = Utc::now();
        Ok((previous, stock.clone()))
    }

    async fn list_requests(
        &self,
        scope: RequestScope,
        status: Option<RequestStatus>,
    ) -> Result<Vec<BloodRequest>, WorkflowError> {
        let state = self.state.lock().await;
        let mut requests: Vec<BloodRequest> = state
            .requests
            .values()
            .filter(|r| scope.owner().map_or(true, |o| r.requester_id == o))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(requests)
    }

    async fn create_request(
        &self,
        requester_id: Uuid,
        input: CreateBloodRequest,
        hospital: String,
    ) -> Result<BloodRequest, WorkflowError> {
        let request = BloodRequest {
            id: Uuid::new_v4(),
            requester_id,
            patient_name: input.patient_name,
            blood_type: input.blood_type,
            bags_requested: input.bags_requested,
            purpose: input.purpose,
            hospital,
            status: RequestStatus::Pending,
            admin_note: None,
            requested_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        };
        self.state
            .lock()
            .await
            .requests
            .insert(request.id, request.clone());
        Ok(request)
    }

    async fn approve(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<(BloodRequest, BloodStock), WorkflowError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();

        let request = staged
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Request {}", request_id)))?;
        ensure_pending(request)?;
        let stock = staged
            .stocks
            .get_mut(&request.blood_type)
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("Stock for blood type {}", request.blood_type))
            })?;
        let remaining = check_approval(request, stock)?;

        let now = Utc::now();
        request.status = RequestStatus::Approved;
        request.admin_note = note;
        request.decided_at = Some(now);
        request.decided_by = Some(actor_id);

        let mut fail = self.fail_stock_write.lock().await;
        if *fail {
            *fail = false;
            return Err(WorkflowError::Transient(sqlx::Error::PoolTimedOut));
        }
        stock.bag_count = remaining;
        stock.updated_at = now;

        let result = (request.clone(), stock.clone());
        *state = staged;
        Ok(result)
    }

    async fn reject(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> Result<BloodRequest, WorkflowError> {
        let mut state = self.state.lock().await;
        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Request {}", request_id)))?;
        ensure_pending(request)?;
        request.status = RequestStatus::Rejected;
        request.admin_note = note;
        request.decided_at = Some(Utc::now());
        request.decided_by = Some(actor_id);
        Ok(request.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{decide, Decision};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn new_request(blood_type: BloodType, bags: i32) -> CreateBloodRequest {
        CreateBloodRequest {
            patient_name: "Siti".to_string(),
            blood_type,
            bags_requested: bags,
            purpose: "Transfusi pasca operasi".to_string(),
            hospital: None,
        }
    }

    async fn setup(blood_type: BloodType, bags_in_stock: i32) -> (MemoryLedger, Uuid) {
        let ledger = MemoryLedger::seeded();
        let admin = Uuid::new_v4();
        assert_ok!(ledger.set_stock_quantity(blood_type, bags_in_stock, admin).await);
        (ledger, admin)
    }

    #[tokio::test]
    async fn test_approve_exact_stock_drains_to_zero() {
        let (ledger, admin) = setup(BloodType::APos, 5).await;
        let r1 = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::APos, 5), "RS".into())
            .await
            .unwrap();

        let (approved, stock) = ledger.approve(r1.id, admin, None).await.unwrap();

        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.decided_by, Some(admin));
        assert!(approved.decided_at.is_some());
        assert_eq!(stock.bag_count, 0);
        assert_eq!(ledger.stock(BloodType::APos).await.unwrap().bag_count, 0);
    }

    #[tokio::test]
    async fn test_approve_insufficient_changes_nothing() {
        let (ledger, admin) = setup(BloodType::ONeg, 2).await;
        let r2 = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::ONeg, 3), "RS".into())
            .await
            .unwrap();

        let err = ledger.approve(r2.id, admin, None).await.unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            }
        ));
        assert_eq!(ledger.stock(BloodType::ONeg).await.unwrap().bag_count, 2);
        assert_eq!(
            ledger.request(r2.id).await.unwrap().status,
            RequestStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_reject_stores_note_and_keeps_stock() {
        let (ledger, admin) = setup(BloodType::BPos, 4).await;
        let r3 = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::BPos, 2), "RS".into())
            .await
            .unwrap();
        let before = ledger.list_stocks().await.unwrap();

        let rejected = ledger
            .reject(r3.id, admin, Some("stok tidak cukup".to_string()))
            .await
            .unwrap();

        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(rejected.admin_note.as_deref(), Some("stok tidak cukup"));
        let after = ledger.list_stocks().await.unwrap();
        let counts = |s: &[BloodStock]| s.iter().map(|x| x.bag_count).collect::<Vec<_>>();
        assert_eq!(counts(&before), counts(&after));
    }

    #[tokio::test]
    async fn test_decided_requests_cannot_be_decided_again() {
        let (ledger, admin) = setup(BloodType::AbPos, 10).await;
        let approved = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::AbPos, 2), "RS".into())
            .await
            .unwrap();
        let rejected = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::AbPos, 2), "RS".into())
            .await
            .unwrap();
        assert_ok!(ledger.approve(approved.id, admin, None).await);
        assert_ok!(ledger.reject(rejected.id, admin, None).await);

        for id in [approved.id, rejected.id] {
            assert!(matches!(
                ledger.approve(id, admin, None).await,
                Err(WorkflowError::InvalidState { .. })
            ));
            assert!(matches!(
                ledger.reject(id, admin, None).await,
                Err(WorkflowError::InvalidState { .. })
            ));
        }

        // double approval must not double-decrement
        assert_eq!(ledger.stock(BloodType::AbPos).await.unwrap().bag_count, 8);
    }

    #[tokio::test]
    async fn test_failed_stock_write_rolls_back_request() {
        let (ledger, admin) = setup(BloodType::OPos, 6).await;
        let req = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::OPos, 4), "RS".into())
            .await
            .unwrap();

        ledger.fail_next_stock_write().await;
        let err = ledger.approve(req.id, admin, None).await.unwrap_err();

        assert!(matches!(err, WorkflowError::Transient(_)));
        assert_eq!(
            ledger.request(req.id).await.unwrap().status,
            RequestStatus::Pending
        );
        assert_eq!(ledger.stock(BloodType::OPos).await.unwrap().bag_count, 6);

        // operator retries
        let (_, stock) = ledger.approve(req.id, admin, None).await.unwrap();
        assert_eq!(stock.bag_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_never_overdraw() {
        let (ledger, admin) = setup(BloodType::ANeg, 5).await;
        let ledger = Arc::new(ledger);
        let first = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::ANeg, 3), "RS".into())
            .await
            .unwrap();
        let second = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::ANeg, 4), "RS".into())
            .await
            .unwrap();

        let a = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.approve(first.id, admin, None).await })
        };
        let b = {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.approve(second.id, admin, None).await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(
            loser,
            Err(WorkflowError::InsufficientStock { .. })
        ));
        assert!(ledger.stock(BloodType::ANeg).await.unwrap().bag_count >= 0);
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let (ledger, admin) = setup(BloodType::BNeg, 3).await;
        assert!(matches!(
            ledger.approve(Uuid::new_v4(), admin, None).await,
            Err(WorkflowError::NotFound(_))
        ));

        let req = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::BNeg, 1), "RS".into())
            .await
            .unwrap();
        ledger.remove_stock(BloodType::BNeg).await;
        assert!(matches!(
            ledger.approve(req.id, admin, None).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_requests_scoped_and_filtered() {
        let (ledger, admin) = setup(BloodType::APos, 10).await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let a1 = ledger
            .create_request(alice, new_request(BloodType::APos, 1), "RS".into())
            .await
            .unwrap();
        ledger
            .create_request(bob, new_request(BloodType::APos, 1), "RS".into())
            .await
            .unwrap();
        assert_ok!(ledger.approve(a1.id, admin, None).await);

        assert_eq!(ledger.list_requests(RequestScope::All, None).await.unwrap().len(), 2);
        let own = ledger
            .list_requests(RequestScope::OwnedBy(alice), None)
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].requester_id, alice);
        let pending = ledger
            .list_requests(RequestScope::All, Some(RequestStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].requester_id, bob);
    }

    #[tokio::test]
    async fn test_decide_dispatches_by_status() {
        let (ledger, admin) = setup(BloodType::OPos, 3).await;
        let a = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::OPos, 2), "RS".into())
            .await
            .unwrap();
        let b = ledger
            .create_request(Uuid::new_v4(), new_request(BloodType::OPos, 2), "RS".into())
            .await
            .unwrap();

        let approved = decide(&ledger, a.id, admin, RequestStatus::Approved, None)
            .await
            .unwrap();
        assert!(matches!(approved, Decision::Approved { ref stock, .. } if stock.bag_count == 1));

        let rejected = decide(&ledger, b.id, admin, RequestStatus::Rejected, Some("habis".into()))
            .await
            .unwrap();
        assert!(matches!(rejected, Decision::Rejected(_)));
        let rejected = rejected.into_request();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(rejected.admin_note.as_deref(), Some("habis"));

        assert!(matches!(
            decide(&ledger, b.id, admin, RequestStatus::Pending, None).await,
            Err(WorkflowError::InvalidTransition(RequestStatus::Pending))
        ));
        assert_eq!(ledger.stock(BloodType::OPos).await.unwrap().bag_count, 1);
    }

    #[tokio::test]
    async fn test_set_stock_rejects_negative() {
        let ledger = MemoryLedger::seeded();
        assert_err!(ledger.set_stock_quantity(BloodType::OPos, -3, Uuid::new_v4()).await);
        assert_eq!(ledger.stock(BloodType::OPos).await.unwrap().bag_count, 0);
        assert_eq!(ledger.list_stocks().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_set_stock_reports_previous_count() {
        let (ledger, admin) = setup(BloodType::BNeg, 12).await;
        let (previous, stock) = ledger
            .set_stock_quantity(BloodType::BNeg, 3, admin)
            .await
            .unwrap();
        assert_eq!(previous, 12);
        assert_eq!(stock.bag_count, 3);
    }
}
