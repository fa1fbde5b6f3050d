//! Input validation module

use crate::models::{
    CreateBloodRequest, CreateDonationRecord, CreateDonationSlot, RegisterRequest, UserRole,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use validator::Validate;

/// Maximum number of slots an admin may publish in one call
pub const MAX_SLOTS_PER_BATCH: usize = 50;

/// Maximum admin note length
pub const MAX_NOTE_LENGTH: usize = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' is too long (max {max} characters)")]
    TooLong { field: String, max: usize },

    #[error("Field '{field}' is invalid")]
    Invalid { field: String },

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Only donor and requester accounts can be registered")]
    RoleNotAllowed,

    #[error("Donors must provide their blood type")]
    BloodTypeRequired,

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Too many slots (max {max} per request)")]
    TooManySlots { max: usize },
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
        fields.sort_unstable();
        match fields.first() {
            Some(&"email") => ValidationError::InvalidEmail,
            Some(field) => ValidationError::Invalid {
                field: field.to_string(),
            },
            None => ValidationError::Invalid {
                field: "input".to_string(),
            },
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validate an account registration
pub fn validate_register(input: &RegisterRequest) -> Result<(), ValidationError> {
    require("name", &input.name)?;
    require("email", &input.email)?;
    input.validate()?;

    match input.role {
        UserRole::Admin => Err(ValidationError::RoleNotAllowed),
        UserRole::Donor if input.blood_type.is_none() => Err(ValidationError::BloodTypeRequired),
        _ => Ok(()),
    }
}

/// Validate a new blood request
pub fn validate_create_request(input: &CreateBloodRequest) -> Result<(), ValidationError> {
    require("patient_name", &input.patient_name)?;
    require("purpose", &input.purpose)?;
    input.validate()?;
    Ok(())
}

/// Validate an optional admin note on a decision
pub fn validate_note(note: Option<&str>) -> Result<(), ValidationError> {
    match note {
        Some(n) if n.chars().count() > MAX_NOTE_LENGTH => Err(ValidationError::TooLong {
            field: "note".to_string(),
            max: MAX_NOTE_LENGTH,
        }),
        _ => Ok(()),
    }
}

/// Validate a batch of donation slots against the current time
pub fn validate_slots(
    slots: &[CreateDonationSlot],
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if slots.is_empty() {
        return Err(ValidationError::Required {
            field: "slots".to_string(),
        });
    }
    if slots.len() > MAX_SLOTS_PER_BATCH {
        return Err(ValidationError::TooManySlots {
            max: MAX_SLOTS_PER_BATCH,
        });
    }

    for slot in slots {
        if slot.slot_end <= slot.slot_start {
            return Err(ValidationError::InvalidSlot(
                "end must be after start".to_string(),
            ));
        }
        if slot.slot_start <= now {
            return Err(ValidationError::InvalidSlot(
                "start must be in the future".to_string(),
            ));
        }
        if let Some(location) = &slot.location {
            if location.len() > 255 {
                return Err(ValidationError::TooLong {
                    field: "location".to_string(),
                    max: 255,
                });
            }
        }
    }

    Ok(())
}

/// Validate a recorded donation
pub fn validate_donation_record(
    input: &CreateDonationRecord,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    input.validate()?;
    if matches!(input.donated_at, Some(at) if at > now) {
        return Err(ValidationError::Invalid {
            field: "donated_at".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BloodType;
    use chrono::Duration;
    use uuid::Uuid;

    fn register(role: UserRole, blood_type: Option<BloodType>) -> RegisterRequest {
        RegisterRequest {
            name: "Maria Wenas".to_string(),
            email: "maria@example.com".to_string(),
            password: "rahasia123".to_string(),
            role,
            blood_type,
            phone: Some("08123456789".to_string()),
            address: None,
        }
    }

    fn blood_request() -> CreateBloodRequest {
        CreateBloodRequest {
            patient_name: "Pak Yohanis".to_string(),
            blood_type: BloodType::OPos,
            bags_requested: 2,
            purpose: "Operasi caesar".to_string(),
            hospital: None,
        }
    }

    #[test]
    fn test_register_valid_donor() {
        assert!(validate_register(&register(UserRole::Donor, Some(BloodType::APos))).is_ok());
    }

    #[test]
    fn test_register_requester_without_blood_type() {
        assert!(validate_register(&register(UserRole::Requester, None)).is_ok());
    }

    #[test]
    fn test_register_donor_requires_blood_type() {
        assert_eq!(
            validate_register(&register(UserRole::Donor, None)),
            Err(ValidationError::BloodTypeRequired)
        );
    }

    #[test]
    fn test_register_admin_not_allowed() {
        assert_eq!(
            validate_register(&register(UserRole::Admin, None)),
            Err(ValidationError::RoleNotAllowed)
        );
    }

    #[test]
    fn test_register_invalid_email() {
        let mut input = register(UserRole::Requester, None);
        input.email = "not-an-email".to_string();
        assert_eq!(validate_register(&input), Err(ValidationError::InvalidEmail));
    }

    #[test]
    fn test_register_short_password() {
        let mut input = register(UserRole::Requester, None);
        input.password = "12345".to_string();
        assert_eq!(
            validate_register(&input),
            Err(ValidationError::Invalid {
                field: "password".to_string()
            })
        );
    }

    #[test]
    fn test_register_blank_name() {
        let mut input = register(UserRole::Requester, None);
        input.name = "   ".to_string();
        assert!(matches!(
            validate_register(&input),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_create_request_valid() {
        assert!(validate_create_request(&blood_request()).is_ok());
    }

    #[test]
    fn test_create_request_bag_bounds() {
        let mut input = blood_request();
        input.bags_requested = 0;
        assert_eq!(
            validate_create_request(&input),
            Err(ValidationError::Invalid {
                field: "bags_requested".to_string()
            })
        );
        input.bags_requested = 51;
        assert!(validate_create_request(&input).is_err());
    }

    #[test]
    fn test_create_request_blank_purpose() {
        let mut input = blood_request();
        input.purpose = " ".to_string();
        assert_eq!(
            validate_create_request(&input),
            Err(ValidationError::Required {
                field: "purpose".to_string()
            })
        );
    }

    #[test]
    fn test_note_length() {
        assert!(validate_note(None).is_ok());
        assert!(validate_note(Some("stok tidak cukup")).is_ok());
        let long = "x".repeat(MAX_NOTE_LENGTH + 1);
        assert!(matches!(
            validate_note(Some(&long)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_slots_validation() {
        let now = Utc::now();
        let slot = |start: i64, end: i64| CreateDonationSlot {
            slot_start: now + Duration::hours(start),
            slot_end: now + Duration::hours(end),
            location: Some("PMI Airmadidi".to_string()),
            notes: None,
        };

        assert!(validate_slots(&[slot(1, 2), slot(3, 4)], now).is_ok());
        assert!(matches!(
            validate_slots(&[], now),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_slots(&[slot(2, 1)], now),
            Err(ValidationError::InvalidSlot(_))
        ));
        assert!(matches!(
            validate_slots(&[slot(-2, 1)], now),
            Err(ValidationError::InvalidSlot(_))
        ));
        let many: Vec<_> = (0..=MAX_SLOTS_PER_BATCH as i64)
            .map(|i| slot(i + 1, i + 2))
            .collect();
        assert!(matches!(
            validate_slots(&many, now),
            Err(ValidationError::TooManySlots { .. })
        ));
    }

    #[test]
    fn test_donation_record_validation() {
        let now = Utc::now();
        let mut input = CreateDonationRecord {
            donor_id: Uuid::new_v4(),
            bags: 1,
            donated_at: Some(now - Duration::hours(1)),
            location: None,
            notes: None,
            credit_stock: true,
        };
        assert!(validate_donation_record(&input, now).is_ok());

        input.donated_at = Some(now + Duration::days(1));
        assert!(validate_donation_record(&input, now).is_err());

        input.donated_at = None;
        input.bags = 0;
        assert!(validate_donation_record(&input, now).is_err());
    }
}
