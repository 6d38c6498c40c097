//! In-memory registry of import sessions.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use etc_core::{EtcError, Result, ValidationError};

use crate::session::{ImportSession, ImportStatus, SessionId};

struct Entry {
    session: ImportSession,
    cancel: CancellationToken,
}

/// Sessions keyed by id, in creation order. Readers get clones.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<IndexMap<SessionId, Entry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Register a session and return its cancellation token.
    pub fn insert(&self, session: ImportSession) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        sessions.insert(
            session.id,
            Entry {
                session,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    pub fn get(&self, id: SessionId) -> Option<ImportSession> {
        let sessions = self.sessions.read().expect("session store lock poisoned");
        sessions.get(&id).map(|e| e.session.clone())
    }

    pub fn list(&self) -> Vec<ImportSession> {
        let sessions = self.sessions.read().expect("session store lock poisoned");
        sessions.values().map(|e| e.session.clone()).collect()
    }

    /// Move a pending session to `processing` under the write lock, so a
    /// concurrent `cancel` either wins before this or signals the token after.
    pub(crate) fn start(&self, id: SessionId) -> Result<(ImportSession, CancellationToken)> {
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| EtcError::not_found("import session", id))?;
        entry.session.start()?;
        Ok((entry.session.clone(), entry.cancel.clone()))
    }

    /// Overwrite the stored snapshot.
    pub(crate) fn put(&self, session: &ImportSession) {
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        if let Some(entry) = sessions.get_mut(&session.id) {
            entry.session = session.clone();
        }
    }

    /// Request cancellation.
    ///
    /// A pending session moves to `cancelled` at once. A processing session
    /// is signalled and reaches `cancelled` when its pipeline next checks the
    /// token. Terminal sessions are refused.
    pub fn cancel(&self, id: SessionId) -> Result<ImportSession> {
        let mut sessions = self.sessions.write().expect("session store lock poisoned");
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| EtcError::not_found("import session", id))?;

        match entry.session.status {
            ImportStatus::Pending => {
                entry.session.cancel()?;
                entry.cancel.cancel();
                info!(session_id = %id, "import session cancelled before start");
            }
            ImportStatus::Processing => {
                entry.cancel.cancel();
                info!(session_id = %id, "cancellation requested for running import");
            }
            status => {
                return Err(ValidationError::new(
                    "status",
                    format!("import session is already {status}"),
                )
                .into());
            }
        }
        Ok(entry.session.clone())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
