//! User identity and participant summary types.
//!
//! Users are owned by the external identity service. The messaging core
//! reads the columns it needs for authorization decisions and for the
//! participant summaries returned with bulk message history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Role of a platform user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Patient,
    Doctor,
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Patient => write!(f, "patient"),
            UserRole::Doctor => write!(f, "doctor"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "patient" => Ok(UserRole::Patient),
            "doctor" => Ok(UserRole::Doctor),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("invalid user role: '{other}'")),
        }
    }
}

/// An authenticated platform user as seen by the messaging core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: UserRole,
    pub display_name: String,
    pub avatar_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Display summary of one participant, used to enrich bulk history replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
}

impl From<&User> for ParticipantSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.display_name.clone(),
            avatar: user.avatar_path.clone(),
        }
    }
}

/// Both participants of a consultation, keyed by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participants {
    pub patient: ParticipantSummary,
    pub doctor: ParticipantSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [UserRole::Patient, UserRole::Doctor, UserRole::Admin] {
            let s = role.to_string();
            let parsed: UserRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&UserRole::Doctor).unwrap();
        assert_eq!(json, "\"doctor\"");
    }

    #[test]
    fn test_participant_summary_from_user() {
        let user = User {
            id: Uuid::now_v7(),
            role: UserRole::Patient,
            display_name: "Maria K.".to_string(),
            avatar_path: Some("/avatars/maria.png".to_string()),
            created_at: Utc::now(),
        };
        let summary = ParticipantSummary::from(&user);
        assert_eq!(summary.id, user.id);
        assert_eq!(summary.name, "Maria K.");
        assert_eq!(summary.avatar.as_deref(), Some("/avatars/maria.png"));
    }
}
