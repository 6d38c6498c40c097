use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use etc_core::{EtcError, Result};

/// Failure switches shared by a memory gateway and all of its transactions.
///
/// Everything is off by default; the setters are only compiled for tests and
/// the `test-utils` feature.
#[derive(Debug, Default)]
pub struct MemoryFaults {
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    panic_on_create: AtomicBool,
    fail_create_fingerprints: Mutex<HashSet<String>>,
}

impl MemoryFaults {
    pub(crate) fn check_begin(&self) -> Result<()> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(EtcError::Transaction("injected begin failure".into()));
        }
        Ok(())
    }

    pub(crate) fn check_commit(&self) -> Result<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(EtcError::Transaction("injected commit failure".into()));
        }
        Ok(())
    }

    pub(crate) fn check_create(&self, fingerprint: &str) -> Result<()> {
        if self.panic_on_create.load(Ordering::SeqCst) {
            panic!("injected panic during create");
        }
        let targets = self.fail_create_fingerprints.lock().expect("faults lock poisoned");
        if targets.contains(fingerprint) {
            return Err(EtcError::Persistence(format!(
                "injected create failure for {fingerprint}"
            )));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryFaults {
    pub fn fail_begin(&self, on: bool) {
        self.fail_begin.store(on, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, on: bool) {
        self.fail_commit.store(on, Ordering::SeqCst);
    }

    pub fn panic_on_create(&self, on: bool) {
        self.panic_on_create.store(on, Ordering::SeqCst);
    }

    pub fn fail_create_for(&self, fingerprint: impl Into<String>) {
        self.fail_create_fingerprints
            .lock()
            .expect("faults lock poisoned")
            .insert(fingerprint.into());
    }
}
