//! Bookkeeping for one CSV import attempt.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use etc_core::ValidationError;

use crate::row::RowError;

pub type SessionId = Uuid;

/// `pending → processing → {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ValidationError::new(
                "status",
                format!("unknown import status '{other}'"),
            )),
        }
    }
}

/// Where an import's data came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSource {
    pub account_id: String,
    pub account_type: String,
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSession {
    pub id: SessionId,
    pub account_id: String,
    pub account_type: String,
    pub file_name: String,
    pub file_size: u64,
    pub status: ImportStatus,
    /// Data rows in the input, header excluded.
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub error: u64,
    pub duplicate: u64,
    pub row_errors: Vec<RowError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the whole session failed or was cancelled.
    pub failure: Option<String>,
}

impl ImportSession {
    pub fn new(source: ImportSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: source.account_id,
            account_type: source.account_type,
            file_name: source.file_name,
            file_size: source.file_size,
            status: ImportStatus::Pending,
            total: 0,
            processed: 0,
            success: 0,
            error: 0,
            duplicate: 0,
            row_errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure: None,
        }
    }

    pub fn start(&mut self) -> Result<(), ValidationError> {
        self.check_from(&[ImportStatus::Pending], ImportStatus::Processing)?;
        self.status = ImportStatus::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), ValidationError> {
        self.check_from(&[ImportStatus::Processing], ImportStatus::Completed)?;
        self.finish(ImportStatus::Completed, None);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ValidationError> {
        self.check_from(&[ImportStatus::Processing], ImportStatus::Failed)?;
        self.finish(ImportStatus::Failed, Some(reason.into()));
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ValidationError> {
        self.check_from(
            &[ImportStatus::Pending, ImportStatus::Processing],
            ImportStatus::Cancelled,
        )?;
        self.finish(ImportStatus::Cancelled, Some("cancelled".to_string()));
        Ok(())
    }

    fn check_from(&self, from: &[ImportStatus], to: ImportStatus) -> Result<(), ValidationError> {
        if from.contains(&self.status) {
            return Ok(());
        }
        Err(ValidationError::new(
            "status",
            format!("cannot move import session from {} to {to}", self.status),
        ))
    }

    fn finish(&mut self, status: ImportStatus, failure: Option<String>) {
        self.status = status;
        self.failure = failure;
        self.processed = self.success + self.error + self.duplicate;
        self.completed_at = Some(Utc::now());
    }

    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicate += 1;
    }

    pub fn record_error(&mut self, error: RowError) {
        self.error += 1;
        self.row_errors.push(error);
    }

    /// `success + error + duplicate == processed <= total`.
    pub fn counters_consistent(&self) -> bool {
        self.success + self.error + self.duplicate == self.processed && self.processed <= self.total
    }
}
