//! Data models for the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "blood_type")]
pub enum BloodType {
    #[serde(rename = "A+")]
    #[sqlx(rename = "A+")]
    APos,
    #[serde(rename = "A-")]
    #[sqlx(rename = "A-")]
    ANeg,
    #[serde(rename = "B+")]
    #[sqlx(rename = "B+")]
    BPos,
    #[serde(rename = "B-")]
    #[sqlx(rename = "B-")]
    BNeg,
    #[serde(rename = "AB+")]
    #[sqlx(rename = "AB+")]
    AbPos,
    #[serde(rename = "AB-")]
    #[sqlx(rename = "AB-")]
    AbNeg,
    #[serde(rename = "O+")]
    #[sqlx(rename = "O+")]
    OPos,
    #[serde(rename = "O-")]
    #[sqlx(rename = "O-")]
    ONeg,
}

impl BloodType {
    pub const ALL: [BloodType; 8] = [
        BloodType::APos,
        BloodType::ANeg,
        BloodType::BPos,
        BloodType::BNeg,
        BloodType::AbPos,
        BloodType::AbNeg,
        BloodType::OPos,
        BloodType::ONeg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloodType::APos => "A+",
            BloodType::ANeg => "A-",
            BloodType::BPos => "B+",
            BloodType::BNeg => "B-",
            BloodType::AbPos => "AB+",
            BloodType::AbNeg => "AB-",
            BloodType::OPos => "O+",
            BloodType::ONeg => "O-",
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBloodType(pub String);

impl fmt::Display for UnknownBloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown blood type: {}", self.0)
    }
}

impl FromStr for BloodType {
    type Err = UnknownBloodType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        BloodType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| UnknownBloodType(s.to_string()))
    }
}

/// Stock classification derived from the bag count, never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Critical,
    Low,
    Safe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Donor,
    Requester,
}

// =============================================================================
// Blood Stock
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BloodStock {
    pub blood_type: BloodType,
    pub bag_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Bag-count limits used to classify stock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockThresholds {
    /// Counts at or below this are critical
    pub critical_max: i32,
    /// Counts at or below this (and above critical) are low
    pub low_max: i32,
}

impl Default for StockThresholds {
    fn default() -> Self {
        Self {
            critical_max: 5,
            low_max: 15,
        }
    }
}

impl StockThresholds {
    pub fn classify(&self, bag_count: i32) -> StockStatus {
        if bag_count <= self.critical_max {
            StockStatus::Critical
        } else if bag_count <= self.low_max {
            StockStatus::Low
        } else {
            StockStatus::Safe
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BloodStockResponse {
    pub blood_type: BloodType,
    pub bag_count: i32,
    pub status: StockStatus,
    pub updated_at: DateTime<Utc>,
}

impl BloodStockResponse {
    pub fn new(stock: BloodStock, thresholds: &StockThresholds) -> Self {
        Self {
            status: thresholds.classify(stock.bag_count),
            blood_type: stock.blood_type,
            bag_count: stock.bag_count,
            updated_at: stock.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetStockQuantity {
    pub bag_count: i32,
}

// =============================================================================
// Blood Request
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BloodRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub patient_name: String,
    pub blood_type: BloodType,
    pub bags_requested: i32,
    pub purpose: String,
    pub hospital: String,
    pub status: RequestStatus,
    pub admin_note: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBloodRequest {
    #[validate(length(min = 1, max = 255))]
    pub patient_name: String,
    pub blood_type: BloodType,
    #[validate(range(min = 1, max = 50))]
    pub bags_requested: i32,
    #[validate(length(min = 1, max = 1000))]
    pub purpose: String,
    #[validate(length(max = 255))]
    pub hospital: Option<String>,
}

/// Admin decision on a pending request
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequestStatus {
    pub status: RequestStatus,
    pub note: Option<String>,
}

/// Result of a committed approval
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub request: BloodRequest,
    pub stock: BloodStockResponse,
}

/// Request totals per status
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestCounts {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

impl RequestCounts {
    pub fn from_rows(rows: &[(RequestStatus, i64)]) -> Self {
        rows.iter().fold(Self::default(), |mut counts, (status, n)| {
            match status {
                RequestStatus::Pending => counts.pending += n,
                RequestStatus::Approved => counts.approved += n,
                RequestStatus::Rejected => counts.rejected += n,
            }
            counts
        })
    }
}

// =============================================================================
// User
// =============================================================================

#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub blood_type: Option<BloodType>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub blood_type: Option<BloodType>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            blood_type: user.blood_type,
            phone: user.phone,
            address: user.address,
            is_active: user.is_active,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    pub role: UserRole,
    pub blood_type: Option<BloodType>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Authenticated session, inserted into request extensions by the auth middleware
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Session {
    pub user: User,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// Donation Slots
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DonationSlot {
    pub id: Uuid,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub location: String,
    pub is_available: bool,
    pub booked_by: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDonationSlot {
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationSlotResponse {
    pub id: Uuid,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub location: String,
    pub is_available: bool,
    pub notes: Option<String>,
}

impl From<DonationSlot> for DonationSlotResponse {
    fn from(slot: DonationSlot) -> Self {
        Self {
            id: slot.id,
            slot_start: slot.slot_start,
            slot_end: slot.slot_end,
            location: slot.location,
            is_available: slot.is_available,
            notes: slot.notes,
        }
    }
}

// =============================================================================
// Donation Records
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DonationRecord {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub blood_type: BloodType,
    pub bags: i32,
    pub donated_at: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDonationRecord {
    pub donor_id: Uuid,
    #[validate(range(min = 1, max = 2))]
    pub bags: i32,
    pub donated_at: Option<DateTime<Utc>>,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[serde(default)]
    pub credit_stock: bool,
}

/// Whether a donor may give blood again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DonorEligibility {
    Ready,
    Waiting { eligible_from: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
pub struct DonorSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub blood_type: Option<BloodType>,
    pub phone: Option<String>,
    pub last_donation_at: Option<DateTime<Utc>>,
    pub total_donations: i64,
    pub eligibility: DonorEligibility,
}

// =============================================================================
// API Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
