//! PostgreSQL gateways.
//!
//! An unscoped gateway runs every statement on the pool. `begin_tx` checks a
//! connection out of the pool and returns a scoped gateway whose statements
//! all run on that connection until commit or rollback. Uniqueness rules are
//! enforced by partial unique indexes (see `migrations/`), so concurrent
//! transactions that both pass the application-level checks still cannot
//! both commit.

use sqlx::postgres::{PgArguments, PgQueryResult};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use etc_core::{EtcError, Result};

/// Run a sqlx query on the transaction if scoped, otherwise on the pool.
macro_rules! exec {
    ($scope:expr, $query:expr, $method:ident) => {
        match $scope.slot() {
            Some(slot) => {
                let mut guard = slot.lock().await;
                let conn = guard.as_mut().ok_or_else($crate::postgres::tx_ended)?;
                $query.$method(&mut **conn).await
            }
            None => $query.$method($scope.pool()).await,
        }
    };
}

mod mappings;
mod records;

pub use mappings::PgMappingGateway;
pub use records::PgRecordGateway;

type TxSlot = Mutex<Option<Transaction<'static, Postgres>>>;

/// Pool handle plus, on scoped instances, the open transaction.
pub(crate) struct Scope {
    pool: PgPool,
    tx: Option<TxSlot>,
}

impl Scope {
    pub(crate) fn unscoped(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn slot(&self) -> Option<&TxSlot> {
        self.tx.as_ref()
    }

    pub(crate) async fn begin(&self) -> Result<Self> {
        if self.tx.is_some() {
            return Err(EtcError::Transaction("nested transactions are not supported".into()));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EtcError::Transaction(format!("begin failed: {e}")))?;
        Ok(Self {
            pool: self.pool.clone(),
            tx: Some(Mutex::new(Some(tx))),
        })
    }

    pub(crate) async fn commit(&self) -> Result<()> {
        self.take()
            .await?
            .commit()
            .await
            .map_err(|e| EtcError::Transaction(format!("commit failed: {e}")))
    }

    pub(crate) async fn rollback(&self) -> Result<()> {
        self.take()
            .await?
            .rollback()
            .await
            .map_err(|e| EtcError::Transaction(format!("rollback failed: {e}")))
    }

    /// Execute a write. Inside a transaction the statement runs under a
    /// savepoint, so a failed write leaves the transaction usable for the
    /// statements that follow it.
    pub(crate) async fn execute_isolated(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        on_err: impl FnOnce(sqlx::Error) -> EtcError,
    ) -> Result<PgQueryResult> {
        let Some(slot) = &self.tx else {
            return query.execute(&self.pool).await.map_err(on_err);
        };
        let mut guard = slot.lock().await;
        let conn = guard.as_mut().ok_or_else(tx_ended)?;

        sqlx::query("SAVEPOINT etc_write")
            .execute(&mut **conn)
            .await
            .map_err(persistence)?;
        match query.execute(&mut **conn).await {
            Ok(result) => {
                sqlx::query("RELEASE SAVEPOINT etc_write")
                    .execute(&mut **conn)
                    .await
                    .map_err(persistence)?;
                Ok(result)
            }
            Err(e) => {
                sqlx::query("ROLLBACK TO SAVEPOINT etc_write")
                    .execute(&mut **conn)
                    .await
                    .map_err(persistence)?;
                Err(on_err(e))
            }
        }
    }

    async fn take(&self) -> Result<Transaction<'static, Postgres>> {
        let slot = self
            .tx
            .as_ref()
            .ok_or_else(|| EtcError::Transaction("no transaction in progress".into()))?;
        slot.lock().await.take().ok_or_else(tx_ended)
    }
}

pub(crate) fn tx_ended() -> EtcError {
    EtcError::Transaction("transaction already committed or rolled back".into())
}

/// Translate a driver error. Unique violations (SQLSTATE 23505) become
/// `Duplicate` with the given message.
pub(crate) fn map_db_error(e: sqlx::Error, duplicate: impl FnOnce() -> String) -> EtcError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return EtcError::Duplicate(duplicate());
        }
    }
    EtcError::Persistence(e.to_string())
}

pub(crate) fn persistence(e: sqlx::Error) -> EtcError {
    EtcError::Persistence(e.to_string())
}
