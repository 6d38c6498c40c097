//! Persistence for toll records and mappings.
//!
//! [`Storage`] picks a backend from configuration: PostgreSQL when a
//! connection is configured, otherwise in-process memory tables.

pub mod error;
pub mod gateway;
pub mod guard;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use etc_core::config::PostgresConfig;

pub use error::StorageError;
pub use gateway::{
    MappingFilter, MappingGateway, RecordFilter, RecordGateway, RecordPage, Transactional,
};
pub use guard::run_guarded;
pub use memory::{MemoryFaults, MemoryMappingGateway, MemoryRecordGateway};
pub use postgres::{PgMappingGateway, PgRecordGateway};

/// Which backend a [`Storage`] is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Postgres,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// The pair of unscoped gateways the rest of the system works against.
#[derive(Clone)]
pub struct Storage {
    pub records: Arc<dyn RecordGateway>,
    pub mappings: Arc<dyn MappingGateway>,
    pub kind: BackendKind,
}

impl Storage {
    /// Fresh in-memory tables.
    pub fn memory() -> Self {
        Self {
            records: Arc::new(MemoryRecordGateway::new()),
            mappings: Arc::new(MemoryMappingGateway::new()),
            kind: BackendKind::Memory,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            records: Arc::new(PgRecordGateway::new(pool.clone())),
            mappings: Arc::new(PgMappingGateway::new(pool)),
            kind: BackendKind::Postgres,
        }
    }

    /// Select the backend from config. PostgreSQL is connected and migrated
    /// up front; connection or migration failures are returned, not hidden.
    pub async fn from_config(config: &PostgresConfig) -> Result<Self, StorageError> {
        if !config.is_configured() {
            info!("PostgreSQL not configured, using in-memory storage");
            return Ok(Self::memory());
        }
        let pool = connect(config).await?;
        migrate(&pool).await?;
        Ok(Self::postgres(pool))
    }
}

/// Open a connection pool for `config`.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, StorageError> {
    if !config.is_configured() {
        return Err(StorageError::NotConfigured(
            "set PG_URL or PG_USERNAME to use PostgreSQL".into(),
        ));
    }
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;
    info!(host = %config.host, database = %config.database, "PostgreSQL connected");
    Ok(pool)
}

/// Apply every pending migration under `migrations/`.
pub async fn migrate(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}
