//! Contract for the per-account statement downloader.
//!
//! The downloader itself lives outside this workspace; the tracker only
//! needs a way to build one per account and to fetch a CSV for a date range.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// A toll-card account to acquire statements for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// e.g. `corporate` or `personal`.
    pub account_type: String,
}

impl Account {
    pub fn new(id: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_type: account_type.into(),
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.account_type)
    }
}

/// A downloaded statement, CSV encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait AcquisitionClient: Send + Sync {
    /// Fetch the statement for `account` covering `from..=to`.
    async fn download(
        &self,
        account: &Account,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AcquiredFile, JobError>;
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, account: &Account) -> Result<Arc<dyn AcquisitionClient>, JobError>;
}
