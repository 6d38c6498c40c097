//! CSV import into the record store.
//!
//! Parsing and validation run up front on the rayon pool. Fingerprinting,
//! the duplicate check and the write then run row by row, in input order,
//! inside one transaction that is committed after the last row.

use std::sync::Arc;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use etc_core::config::ImportConfig;
use etc_core::{EtcError, EtcRecord, Result, ValidationError};
use etc_storage::{run_guarded, RecordGateway};

use crate::error::ImportError;
use crate::parse::{check_rows, read_rows, ValidRow};
use crate::row::{RowError, RowErrorKind};
use crate::session::{ImportSession, ImportSource, SessionId};
use crate::store::SessionStore;

pub struct ImportPipeline {
    pub(crate) records: Arc<dyn RecordGateway>,
    sessions: SessionStore,
    pub(crate) config: ImportConfig,
}

impl ImportPipeline {
    pub fn new(records: Arc<dyn RecordGateway>, config: ImportConfig) -> Self {
        Self {
            records,
            sessions: SessionStore::new(),
            config,
        }
    }

    /// Share a session registry with other pipelines.
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Register a pending session. Nothing is read or written yet.
    pub fn create_session(&self, source: ImportSource) -> ImportSession {
        let session = ImportSession::new(source);
        self.sessions.insert(session.clone());
        debug!(session_id = %session.id, file = %session.file_name, "import session created");
        session
    }

    /// Create a session for `data` and run it.
    pub async fn import_csv(
        &self,
        mut source: ImportSource,
        data: &[u8],
    ) -> Result<ImportSession, ImportError> {
        source.file_size = data.len() as u64;
        let session = self.create_session(source);
        self.execute_session(session.id, data).await
    }

    /// Run a pending session over `data`.
    ///
    /// Returns the `completed` session, row errors included. A session that
    /// ends `failed` (begin or commit failure, oversized input) or
    /// `cancelled` comes back inside [`ImportError::Aborted`].
    pub async fn execute_session(
        &self,
        id: SessionId,
        data: &[u8],
    ) -> Result<ImportSession, ImportError> {
        let (mut session, cancel) = self.sessions.start(id)?;
        info!(
            session_id = %id,
            account_id = %session.account_id,
            file = %session.file_name,
            bytes = data.len(),
            "import started"
        );

        let limit = self.config.max_file_bytes();
        if data.len() as u64 > limit {
            let err = ValidationError::new("file", format!("input exceeds {limit} bytes"));
            return Err(self.abort(session, err.into()));
        }

        let rows = read_rows(data);
        session.total = rows.len() as u64;
        self.sessions.put(&session);

        let today = Local::now().date_naive();
        let checked = match tokio::task::spawn_blocking(move || check_rows(rows, today)).await {
            Ok(checked) => checked,
            Err(e) => {
                let err = EtcError::Persistence(format!("row validation task failed: {e}"));
                return Err(self.abort(session, err));
            }
        };

        if cancel.is_cancelled() {
            return Err(self.abort(session, EtcError::Cancelled));
        }
        let tx = match self.records.begin_tx().await {
            Ok(tx) => tx,
            Err(e) => return Err(self.abort(session, e)),
        };

        let outcome = run_guarded(
            tx.as_ref(),
            persist_rows(tx.as_ref(), checked, &mut session, &cancel),
        )
        .await;

        match outcome {
            Ok(()) => {
                session.complete().map_err(EtcError::from)?;
                self.sessions.put(&session);
                info!(
                    session_id = %id,
                    total = session.total,
                    success = session.success,
                    duplicate = session.duplicate,
                    error = session.error,
                    "import completed"
                );
                Ok(session)
            }
            Err(e) => Err(self.abort(session, e)),
        }
    }

    /// End a processing session as `cancelled` or `failed` and record it.
    fn abort(&self, mut session: ImportSession, cause: EtcError) -> ImportError {
        let ended = match cause {
            EtcError::Cancelled => session.cancel(),
            ref e => session.fail(e.to_string()),
        };
        if let Err(e) = ended {
            warn!(session_id = %session.id, error = %e, "could not end import session");
        }
        self.sessions.put(&session);
        warn!(
            session_id = %session.id,
            status = %session.status,
            error = %cause,
            "import aborted"
        );
        ImportError::Aborted {
            session: Box::new(session),
            source: cause,
        }
    }
}

async fn persist_rows(
    tx: &dyn RecordGateway,
    rows: Vec<Result<ValidRow, RowError>>,
    session: &mut ImportSession,
    cancel: &CancellationToken,
) -> Result<()> {
    for row in rows {
        if cancel.is_cancelled() {
            return Err(EtcError::Cancelled);
        }
        let valid = match row {
            Ok(valid) => valid,
            Err(row_error) => {
                debug!(session_id = %session.id, %row_error, "row rejected");
                session.record_error(row_error);
                continue;
            }
        };

        let record = EtcRecord::new(valid.fields)
            .with_source_row(format!("{}:{}", session.id, valid.line));
        if tx.check_duplicate_fingerprint(record.fingerprint(), &[]).await? {
            debug!(session_id = %session.id, row = valid.line, "duplicate row skipped");
            session.record_duplicate();
            continue;
        }
        match tx.create(&record).await {
            Ok(()) => session.record_success(),
            // the store's own unique check caught a row the lookup missed
            Err(EtcError::Duplicate(msg)) => {
                debug!(session_id = %session.id, row = valid.line, %msg, "duplicate row skipped");
                session.record_duplicate();
            }
            Err(e) => session.record_error(RowError::new(
                valid.line,
                RowErrorKind::CreationError,
                e.to_string(),
                valid.raw,
            )),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
