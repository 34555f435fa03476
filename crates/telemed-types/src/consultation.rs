//! Consultation types: a bounded chat between one patient and one doctor.
//!
//! A consultation carries a lifecycle status, a message cap, and a counter
//! that the message store keeps under the cap while the consultation is
//! active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a consultation.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('pending', 'active', 'completed', 'cancelled'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationStatus::Pending => write!(f, "pending"),
            ConsultationStatus::Active => write!(f, "active"),
            ConsultationStatus::Completed => write!(f, "completed"),
            ConsultationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ConsultationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ConsultationStatus::Pending),
            "active" => Ok(ConsultationStatus::Active),
            "completed" => Ok(ConsultationStatus::Completed),
            "cancelled" => Ok(ConsultationStatus::Cancelled),
            other => Err(format!("invalid consultation status: '{other}'")),
        }
    }
}

impl Default for ConsultationStatus {
    fn default() -> Self {
        ConsultationStatus::Pending
    }
}

/// A consultation between a patient and a doctor.
///
/// `message_count` is monotonically increasing and never exceeds
/// `message_limit` while the consultation is active. Mutation of the status
/// and the counters is serialized per consultation by the message store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consultation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub status: ConsultationStatus,
    pub message_limit: u32,
    pub message_count: u32,
    /// Free-text note the patient attached when requesting the consultation.
    pub patient_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Consultation {
    /// Whether the given user is the patient or the doctor of this consultation.
    pub fn is_participant(&self, user_id: &Uuid) -> bool {
        self.patient_id == *user_id || self.doctor_id == *user_id
    }

    /// The other participant relative to `user_id`.
    ///
    /// Returns `None` when `user_id` is not a participant.
    pub fn peer_of(&self, user_id: &Uuid) -> Option<Uuid> {
        if self.patient_id == *user_id {
            Some(self.doctor_id)
        } else if self.doctor_id == *user_id {
            Some(self.patient_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_consultation(patient_id: Uuid, doctor_id: Uuid) -> Consultation {
        Consultation {
            id: Uuid::now_v7(),
            patient_id,
            doctor_id,
            status: ConsultationStatus::Active,
            message_limit: 30,
            message_count: 0,
            patient_note: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ConsultationStatus::Pending,
            ConsultationStatus::Active,
            ConsultationStatus::Completed,
            ConsultationStatus::Cancelled,
        ] {
            let s = status.to_string();
            let parsed: ConsultationStatus = s.parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_status_serde() {
        let status = ConsultationStatus::Active;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"active\"");
        let parsed: ConsultationStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ConsultationStatus::Active);
    }

    #[test]
    fn test_status_default_is_pending() {
        assert_eq!(ConsultationStatus::default(), ConsultationStatus::Pending);
    }

    #[test]
    fn test_invalid_status_rejected() {
        let parsed = "archived".parse::<ConsultationStatus>();
        assert!(parsed.is_err());
    }

    #[test]
    fn test_is_participant() {
        let patient = Uuid::now_v7();
        let doctor = Uuid::now_v7();
        let consultation = make_consultation(patient, doctor);

        assert!(consultation.is_participant(&patient));
        assert!(consultation.is_participant(&doctor));
        assert!(!consultation.is_participant(&Uuid::now_v7()));
    }

    #[test]
    fn test_peer_of() {
        let patient = Uuid::now_v7();
        let doctor = Uuid::now_v7();
        let consultation = make_consultation(patient, doctor);

        assert_eq!(consultation.peer_of(&patient), Some(doctor));
        assert_eq!(consultation.peer_of(&doctor), Some(patient));
        assert_eq!(consultation.peer_of(&Uuid::now_v7()), None);
    }

    #[test]
    fn test_consultation_serialize() {
        let consultation = make_consultation(Uuid::now_v7(), Uuid::now_v7());
        let json = serde_json::to_string(&consultation).unwrap();
        assert!(json.contains("\"status\":\"active\""));
        assert!(json.contains("\"message_limit\":30"));
    }
}
