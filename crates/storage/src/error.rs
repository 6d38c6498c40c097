use thiserror::Error;

/// Failures while wiring up a storage backend. Gateway operations report
/// `etc_core::EtcError` instead.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("not configured: {0}")]
    NotConfigured(String),
}
