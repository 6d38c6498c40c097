//! Links between toll records and external entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::record::RecordId;

pub type MappingId = Uuid;

/// Lifecycle status of a [`Mapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Pending,
    Active,
    Inactive,
    Rejected,
}

/// Every permitted `(from, to)` status change. Anything absent is refused,
/// including staying in the same status.
pub const ALLOWED_TRANSITIONS: &[(MappingStatus, MappingStatus)] = &[
    (MappingStatus::Pending, MappingStatus::Active),
    (MappingStatus::Pending, MappingStatus::Rejected),
    (MappingStatus::Active, MappingStatus::Inactive),
    (MappingStatus::Inactive, MappingStatus::Active),
    (MappingStatus::Rejected, MappingStatus::Pending),
];

impl MappingStatus {
    pub const ALL: [MappingStatus; 4] = [
        MappingStatus::Pending,
        MappingStatus::Active,
        MappingStatus::Inactive,
        MappingStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Rejected => "rejected",
        }
    }

    pub fn can_transition_to(self, to: MappingStatus) -> bool {
        ALLOWED_TRANSITIONS.contains(&(self, to))
    }

    pub fn check_transition(self, to: MappingStatus) -> Result<(), ValidationError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(ValidationError::new(
                "status",
                format!("cannot transition mapping from {self} to {to}"),
            ))
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "rejected" => Ok(Self::Rejected),
            other => Err(ValidationError::new(
                "status",
                format!("unknown mapping status '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: MappingId,
    pub record_id: RecordId,
    pub entity_id: String,
    pub entity_type: String,
    /// Free-form classification such as `automatic` or `manual`.
    pub mapping_type: String,
    pub confidence: f64,
    pub status: MappingStatus,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
