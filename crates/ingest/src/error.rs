use thiserror::Error;

use etc_core::{ErrorKind, EtcError};

use crate::session::ImportSession;

#[derive(Error, Debug)]
pub enum ImportError {
    /// The import never started: unknown session, or one not pending.
    #[error(transparent)]
    Rejected(#[from] EtcError),

    /// The session ran and ended `failed` or `cancelled`.
    #[error("import session {} {}: {source}", session.id, session.status)]
    Aborted {
        session: Box<ImportSession>,
        #[source]
        source: EtcError,
    },
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected(e) | Self::Aborted { source: e, .. } => e.kind(),
        }
    }

    /// Final state of the session, when it got that far.
    pub fn session(&self) -> Option<&ImportSession> {
        match self {
            Self::Rejected(_) => None,
            Self::Aborted { session, .. } => Some(session),
        }
    }
}
