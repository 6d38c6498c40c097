//! Commit-or-rollback wrapper for transactional work.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::warn;

use etc_core::{EtcError, Result};

use crate::gateway::Transactional;

/// Drive `body` inside the transaction `tx` and end the transaction.
///
/// - `Ok` from the body: commit; a commit failure is returned as-is.
/// - `Err` from the body: roll back, then return the body's error.
/// - panic in the body: roll back, then return `EtcError::Transaction`
///   carrying the panic message. The panic does not propagate.
///
/// A failed rollback is logged and never replaces the original error.
pub async fn run_guarded<G, T, Fut>(tx: &G, body: Fut) -> Result<T>
where
    G: Transactional + ?Sized,
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(value)) => {
            tx.commit_tx().await?;
            Ok(value)
        }
        Ok(Err(e)) => {
            rollback_quietly(tx).await;
            Err(e)
        }
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            rollback_quietly(tx).await;
            Err(EtcError::Transaction(format!("transaction aborted by panic: {msg}")))
        }
    }
}

/// Roll back, logging instead of returning a rollback failure.
pub async fn rollback_quietly<G: Transactional + ?Sized>(tx: &G) {
    if let Err(e) = tx.rollback_tx().await {
        warn!(error = %e, "rollback failed");
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        fail_commit: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transactional for Recorder {
        async fn commit_tx(&self) -> Result<()> {
            self.calls.lock().unwrap().push("commit");
            if self.fail_commit {
                return Err(EtcError::Transaction("commit refused".into()));
            }
            Ok(())
        }

        async fn rollback_tx(&self) -> Result<()> {
            self.calls.lock().unwrap().push("rollback");
            Ok(())
        }
    }

    #[tokio::test]
    async fn ok_commits() {
        let tx = Recorder::default();
        let value = run_guarded(&tx, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(tx.calls(), vec!["commit"]);
    }

    #[tokio::test]
    async fn err_rolls_back_and_keeps_error() {
        let tx = Recorder::default();
        let err = run_guarded(&tx, async { Err::<(), _>(EtcError::not_found("record", "r1")) })
            .await
            .unwrap_err();
        assert!(matches!(err, EtcError::NotFound { .. }));
        assert_eq!(tx.calls(), vec!["rollback"]);
    }

    #[tokio::test]
    async fn panic_rolls_back_and_becomes_transaction_error() {
        let tx = Recorder::default();
        let err = run_guarded(&tx, async {
            if tx.calls().is_empty() {
                panic!("row 3 exploded");
            }
            Ok(())
        })
        .await
        .unwrap_err();

        match err {
            EtcError::Transaction(msg) => assert!(msg.contains("row 3 exploded")),
            other => panic!("expected Transaction, got {other:?}"),
        }
        assert_eq!(tx.calls(), vec!["rollback"]);
    }

    #[tokio::test]
    async fn commit_failure_is_returned() {
        let tx = Recorder {
            fail_commit: true,
            ..Recorder::default()
        };
        let err = run_guarded(&tx, async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, EtcError::Transaction(_)));
    }
}
