//! Acquisition and job error types.

use thiserror::Error;

use etc_core::retry::RetryError;
use etc_ingest::ImportError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("no acquisition client for account {account}: {reason}")]
    ClientUnavailable { account: String, reason: String },

    #[error("download gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<JobError> },

    #[error("download cancelled")]
    Cancelled,

    #[error("import failed: {0}")]
    Import(#[from] ImportError),

    #[error("job {0} is already running")]
    AlreadyRunning(String),
}

impl From<RetryError<JobError>> for JobError {
    fn from(e: RetryError<JobError>) -> Self {
        match e {
            RetryError::Cancelled { .. } => Self::Cancelled,
            RetryError::Exhausted { attempts, last } => Self::Exhausted {
                attempts,
                last: Box::new(last),
            },
        }
    }
}
