//! Blood request approval workflow
//!
//! A pending request is approved only when the stock for its blood type covers
//! the requested bags. Approval and the stock decrement are committed as one
//! unit by the [`Ledger`] implementation; rejection never touches stock.

#[cfg(test)]
pub mod memory;

use crate::models::{
    BloodRequest, BloodStock, BloodType, CreateBloodRequest, RequestStatus,
};
use axum::http::StatusCode;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Request {id} is already {status:?}")]
    InvalidState { id: Uuid, status: RequestStatus },

    #[error("Insufficient {blood_type} stock: available {available}, requested {requested}")]
    InsufficientStock {
        blood_type: BloodType,
        available: i32,
        requested: i32,
    },

    #[error("A request cannot be moved to {0:?}")]
    InvalidTransition(RequestStatus),

    #[error("Bag count must not be negative (got {0})")]
    InvalidQuantity(i32),

    #[error("Storage unavailable: {0}")]
    Transient(#[from] sqlx::Error),
}

impl WorkflowError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::InvalidState { .. } => StatusCode::CONFLICT,
            WorkflowError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::InvalidTransition(_) | WorkflowError::InvalidQuantity(_) => {
                StatusCode::BAD_REQUEST
            }
            WorkflowError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message safe to show to the operator
    pub fn public_message(&self) -> String {
        match self {
            WorkflowError::Transient(_) => {
                "Storage temporarily unavailable, nothing was changed. Please retry.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Which requests a caller may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScope {
    All,
    OwnedBy(Uuid),
}

impl RequestScope {
    /// Requester the listing is restricted to, if any
    pub fn owner(&self) -> Option<Uuid> {
        match self {
            RequestScope::All => None,
            RequestScope::OwnedBy(owner) => Some(*owner),
        }
    }
}

/// Request must still be pending to be decided
pub fn ensure_pending(request: &BloodRequest) -> Result<(), WorkflowError> {
    if request.status.is_terminal() {
        return Err(WorkflowError::InvalidState {
            id: request.id,
            status: request.status,
        });
    }
    Ok(())
}

/// Decide an approval against the locked stock row, returning the new bag count
pub fn check_approval(request: &BloodRequest, stock: &BloodStock) -> Result<i32, WorkflowError> {
    ensure_pending(request)?;

    if stock.blood_type != request.blood_type {
        return Err(WorkflowError::NotFound(format!(
            "Stock for blood type {}",
            request.blood_type
        )));
    }

    if stock.bag_count < request.bags_requested {
        return Err(WorkflowError::InsufficientStock {
            blood_type: request.blood_type,
            available: stock.bag_count,
            requested: request.bags_requested,
        });
    }

    Ok(stock.bag_count - request.bags_requested)
}

pub fn check_quantity(bag_count: i32) -> Result<(), WorkflowError> {
    if bag_count < 0 {
        return Err(WorkflowError::InvalidQuantity(bag_count));
    }
    Ok(())
}

/// Outcome of an admin decision on a pending request
#[derive(Debug, Clone)]
pub enum Decision {
    Approved {
        request: BloodRequest,
        stock: BloodStock,
    },
    Rejected(BloodRequest),
}

impl Decision {
    pub fn into_request(self) -> BloodRequest {
        match self {
            Decision::Approved { request, .. } | Decision::Rejected(request) => request,
        }
    }
}

/// Apply a target status to a pending request through the ledger
pub async fn decide<L: Ledger>(
    ledger: &L,
    request_id: Uuid,
    actor_id: Uuid,
    status: RequestStatus,
    note: Option<String>,
) -> Result<Decision, WorkflowError> {
    match status {
        RequestStatus::Approved => {
            let (request, stock) = ledger.approve(request_id, actor_id, note).await?;
            Ok(Decision::Approved { request, stock })
        }
        RequestStatus::Rejected => {
            let request = ledger.reject(request_id, actor_id, note).await?;
            Ok(Decision::Rejected(request))
        }
        RequestStatus::Pending => Err(WorkflowError::InvalidTransition(status)),
    }
}

/// Persistent store for stock and requests
///
/// `approve` and `reject` must each run as a single transaction: the request
/// row and the stock row are locked, checked and written together, and any
/// error leaves both unchanged.
pub trait Ledger: Send + Sync {
    fn list_stocks(&self) -> impl Future<Output = Result<Vec<BloodStock>, WorkflowError>> + Send;

    /// Returns the bag count before the change alongside the updated stock
    fn set_stock_quantity(
        &self,
        blood_type: BloodType,
        bag_count: i32,
        actor_id: Uuid,
    ) -> impl Future<Output = Result<(i32, BloodStock), WorkflowError>> + Send;

    fn list_requests(
        &self,
        scope: RequestScope,
        status: Option<RequestStatus>,
    ) -> impl Future<Output = Result<Vec<BloodRequest>, WorkflowError>> + Send;

    fn create_request(
        &self,
        requester_id: Uuid,
        input: CreateBloodRequest,
        hospital: String,
    ) -> impl Future<Output = Result<BloodRequest, WorkflowError>> + Send;

    fn approve(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> impl Future<Output = Result<(BloodRequest, BloodStock), WorkflowError>> + Send;

    fn reject(
        &self,
        request_id: Uuid,
        actor_id: Uuid,
        note: Option<String>,
    ) -> impl Future<Output = Result<BloodRequest, WorkflowError>> + Send;
}
