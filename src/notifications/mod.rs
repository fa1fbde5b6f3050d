//! Stock alerts, donor reminders and admin summaries
//!
//! Notifications are emitted as structured log events; delivery to people is
//! left to whatever collects the logs.

pub mod dispatch;
pub mod scheduler;

use crate::models::{BloodStock, BloodType, RequestCounts, StockStatus, StockThresholds};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockAlert {
    pub blood_type: BloodType,
    pub bag_count: i32,
    pub status: StockStatus,
}

/// Critical and low stocks, most urgent first
pub fn stock_alerts(stocks: &[BloodStock], thresholds: &StockThresholds) -> Vec<StockAlert> {
    let mut alerts: Vec<StockAlert> = stocks
        .iter()
        .filter_map(|stock| {
            let status = thresholds.classify(stock.bag_count);
            (status != StockStatus::Safe).then_some(StockAlert {
                blood_type: stock.blood_type,
                bag_count: stock.bag_count,
                status,
            })
        })
        .collect();

    alerts.sort_by_key(|a| (a.status, a.bag_count, a.blood_type));
    alerts
}

pub fn emit(alerts: &[StockAlert]) {
    for alert in alerts {
        match alert.status {
            StockStatus::Critical => tracing::warn!(
                blood_type = %alert.blood_type,
                bag_count = alert.bag_count,
                "Blood stock critical"
            ),
            StockStatus::Low => tracing::info!(
                blood_type = %alert.blood_type,
                bag_count = alert.bag_count,
                "Blood stock low"
            ),
            StockStatus::Safe => {}
        }
    }
}

/// Warn when a change moved a stock from above critical into critical
pub fn check_after_change(
    previous_bag_count: i32,
    stock: &BloodStock,
    thresholds: &StockThresholds,
) -> Option<StockAlert> {
    let was_critical = thresholds.classify(previous_bag_count) == StockStatus::Critical;
    let alert = stock_alerts(std::slice::from_ref(stock), thresholds)
        .into_iter()
        .find(|a| a.status == StockStatus::Critical && !was_critical)?;
    emit(std::slice::from_ref(&alert));
    Some(alert)
}

/// Donor with a booked slot starting soon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DonorReminder {
    pub donor_id: Uuid,
    pub donor_name: String,
    pub donor_email: String,
    pub slot_id: Uuid,
    pub slot_start: DateTime<Utc>,
    pub location: String,
}

pub fn emit_reminders(reminders: &[DonorReminder]) {
    for reminder in reminders {
        tracing::info!(
            donor_id = %reminder.donor_id,
            email = %reminder.donor_email,
            slot_start = %reminder.slot_start,
            location = %reminder.location,
            "Donation reminder"
        );
    }
}

/// Activity over the last seven days plus the current stock situation
#[derive(Debug, Clone, Serialize)]
pub struct WeeklySummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub requests: RequestCounts,
    pub bags_issued: i64,
    pub donations: i64,
    pub bags_donated: i64,
    pub alerts: Vec<StockAlert>,
}

pub fn emit_weekly_summary(summary: &WeeklySummary) {
    tracing::info!(
        period_start = %summary.period_start,
        period_end = %summary.period_end,
        requests_pending = summary.requests.pending,
        requests_approved = summary.requests.approved,
        requests_rejected = summary.requests.rejected,
        bags_issued = summary.bags_issued,
        donations = summary.donations,
        bags_donated = summary.bags_donated,
        stock_alerts = summary.alerts.len(),
        "Weekly blood bank summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(blood_type: BloodType, bag_count: i32) -> BloodStock {
        BloodStock {
            blood_type,
            bag_count,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_alerts_skip_safe_and_order_by_urgency() {
        let stocks = vec![
            stock(BloodType::APos, 40),
            stock(BloodType::BPos, 12),
            stock(BloodType::ONeg, 4),
            stock(BloodType::AbNeg, 0),
            stock(BloodType::OPos, 7),
        ];

        let alerts = stock_alerts(&stocks, &StockThresholds::default());

        let order: Vec<_> = alerts.iter().map(|a| (a.blood_type, a.status)).collect();
        assert_eq!(
            order,
            vec![
                (BloodType::AbNeg, StockStatus::Critical),
                (BloodType::ONeg, StockStatus::Critical),
                (BloodType::OPos, StockStatus::Low),
                (BloodType::BPos, StockStatus::Low),
            ]
        );
    }

    #[test]
    fn test_no_alerts_when_all_safe() {
        let stocks: Vec<_> = BloodType::ALL.into_iter().map(|t| stock(t, 100)).collect();
        assert!(stock_alerts(&stocks, &StockThresholds::default()).is_empty());
    }

    #[test]
    fn test_custom_thresholds() {
        let thresholds = StockThresholds {
            critical_max: 1,
            low_max: 3,
        };
        let alerts = stock_alerts(&[stock(BloodType::BNeg, 2)], &thresholds);
        assert_eq!(alerts[0].status, StockStatus::Low);
    }

    #[test]
    fn test_change_alerts_only_when_entering_critical() {
        let thresholds = StockThresholds::default();

        let entered = check_after_change(9, &stock(BloodType::APos, 4), &thresholds);
        assert_eq!(entered.map(|a| a.status), Some(StockStatus::Critical));

        // already critical before the change
        assert!(check_after_change(5, &stock(BloodType::APos, 2), &thresholds).is_none());
        // still above critical
        assert!(check_after_change(20, &stock(BloodType::APos, 10), &thresholds).is_none());
        // restocked out of critical
        assert!(check_after_change(1, &stock(BloodType::APos, 30), &thresholds).is_none());
    }
}
