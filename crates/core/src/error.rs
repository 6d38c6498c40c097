use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single failed field check.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Taxonomy bucket of an [`EtcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Duplicate,
    NotFound,
    Transaction,
    Persistence,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Duplicate => "duplicate",
            Self::NotFound => "not_found",
            Self::Transaction => "transaction",
            Self::Persistence => "persistence",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum EtcError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Fingerprint collision or a second active mapping on one record.
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Begin/commit/rollback failure, or a transaction aborted by a panic.
    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EtcError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transaction(_) => ErrorKind::Transaction,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T, E = EtcError> = std::result::Result<T, E>;
