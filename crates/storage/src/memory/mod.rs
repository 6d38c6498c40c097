//! In-process gateways backed by `IndexMap`s.
//!
//! A scoped instance buffers its writes in an overlay. Reads see the overlay
//! on top of the shared table. Commit re-validates every buffered row against
//! the current shared table and applies them atomically, so uniqueness holds
//! even when two transactions raced on the same key.
//!
//! Both the shared table and each overlay index their rows by unique key, so
//! a uniqueness lookup or a write costs the same however many rows exist.

mod faults;
mod mappings;
mod records;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use uuid::Uuid;

use etc_core::{EtcError, Result};

pub use faults::MemoryFaults;
pub use mappings::MemoryMappingGateway;
pub use records::MemoryRecordGateway;

pub(crate) trait Row: Clone + Send + Sync + 'static {
    fn key(&self) -> Uuid;

    /// Value that no two rows may share, or `None` when the row is exempt
    /// (a soft-deleted record, a mapping that is not active).
    fn unique_key(&self) -> Option<String>;

    /// Message for a row refused because its unique key is taken.
    fn conflict_message(&self) -> String;
}

struct Shared<V> {
    rows: IndexMap<Uuid, V>,
    unique: HashMap<String, Uuid>,
}

impl<V: Row> Shared<V> {
    fn holder(&self, unique_key: &str) -> Option<Uuid> {
        self.unique.get(unique_key).copied()
    }

    fn unindex(&mut self, key: Uuid) {
        if let Some(old) = self.rows.get(&key).and_then(Row::unique_key) {
            if self.unique.get(&old) == Some(&key) {
                self.unique.remove(&old);
            }
        }
    }

    fn store(&mut self, key: Uuid, value: Option<V>) {
        match value {
            Some(v) => {
                if let Some(k) = v.unique_key() {
                    self.unique.insert(k, key);
                }
                self.rows.insert(key, v);
            }
            None => {
                self.rows.shift_remove(&key);
            }
        }
    }
}

struct Overlay<V> {
    writes: IndexMap<Uuid, Option<V>>,
    /// Unique keys held by rows written in this transaction.
    unique: HashMap<String, Uuid>,
}

impl<V: Row> Overlay<V> {
    fn new() -> Self {
        Self {
            writes: IndexMap::new(),
            unique: HashMap::new(),
        }
    }

    fn write(&mut self, key: Uuid, value: Option<V>) {
        if let Some(old) = self.writes.get(&key).and_then(|v| v.as_ref()?.unique_key()) {
            if self.unique.get(&old) == Some(&key) {
                self.unique.remove(&old);
            }
        }
        if let Some(k) = value.as_ref().and_then(Row::unique_key) {
            self.unique.insert(k, key);
        }
        self.writes.insert(key, value);
    }
}

pub(crate) struct Table<V: Row> {
    shared: Arc<Mutex<Shared<V>>>,
    /// `Some` on scoped instances; the inner `None` marks an ended transaction.
    overlay: Option<Mutex<Option<Overlay<V>>>>,
}

impl<V: Row> Table<V> {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                rows: IndexMap::new(),
                unique: HashMap::new(),
            })),
            overlay: None,
        }
    }

    pub(crate) fn is_scoped(&self) -> bool {
        self.overlay.is_some()
    }

    pub(crate) fn begin(&self) -> Result<Self> {
        if self.is_scoped() {
            return Err(EtcError::Transaction("nested transactions are not supported".into()));
        }
        Ok(Self {
            shared: Arc::clone(&self.shared),
            overlay: Some(Mutex::new(Some(Overlay::new()))),
        })
    }

    /// Merged view of every row, in insertion order.
    pub(crate) fn rows(&self) -> Result<Vec<V>> {
        let shared = self.shared.lock().expect("memory table lock poisoned");
        match &self.overlay {
            None => Ok(shared.rows.values().cloned().collect()),
            Some(slot) => {
                let guard = slot.lock().expect("memory overlay lock poisoned");
                let overlay = guard.as_ref().ok_or_else(tx_ended)?;
                let mut merged = shared.rows.clone();
                for (key, value) in &overlay.writes {
                    match value {
                        Some(v) => {
                            merged.insert(*key, v.clone());
                        }
                        None => {
                            merged.shift_remove(key);
                        }
                    }
                }
                Ok(merged.into_values().collect())
            }
        }
    }

    pub(crate) fn get(&self, key: Uuid) -> Result<Option<V>> {
        if let Some(slot) = &self.overlay {
            let guard = slot.lock().expect("memory overlay lock poisoned");
            let overlay = guard.as_ref().ok_or_else(tx_ended)?;
            if let Some(entry) = overlay.writes.get(&key) {
                return Ok(entry.clone());
            }
        }
        let shared = self.shared.lock().expect("memory table lock poisoned");
        Ok(shared.rows.get(&key).cloned())
    }

    /// The row currently holding `unique_key`, as seen by this instance.
    pub(crate) fn find_unique(&self, unique_key: &str) -> Result<Option<V>> {
        let shared = self.shared.lock().expect("memory table lock poisoned");
        let Some(slot) = &self.overlay else {
            return Ok(shared
                .holder(unique_key)
                .and_then(|key| shared.rows.get(&key).cloned()));
        };

        let guard = slot.lock().expect("memory overlay lock poisoned");
        let overlay = guard.as_ref().ok_or_else(tx_ended)?;
        if let Some(key) = overlay.unique.get(unique_key) {
            return Ok(overlay.writes.get(key).cloned().flatten());
        }
        // a shared holder rewritten in this transaction no longer holds the
        // key, otherwise the overlay index would have found it
        Ok(shared
            .holder(unique_key)
            .filter(|key| !overlay.writes.contains_key(key))
            .and_then(|key| shared.rows.get(&key).cloned()))
    }

    /// Insert or replace a row, refusing it when another row holds its
    /// unique key.
    pub(crate) fn put(&self, row: V) -> Result<()> {
        if let Some(unique_key) = row.unique_key() {
            if let Some(other) = self.find_unique(&unique_key)? {
                if other.key() != row.key() {
                    return Err(EtcError::Duplicate(row.conflict_message()));
                }
            }
        }
        self.write(row.key(), Some(row))
    }

    pub(crate) fn remove(&self, key: Uuid) -> Result<()> {
        self.write(key, None)
    }

    fn write(&self, key: Uuid, value: Option<V>) -> Result<()> {
        match &self.overlay {
            Some(slot) => {
                let mut guard = slot.lock().expect("memory overlay lock poisoned");
                let overlay = guard.as_mut().ok_or_else(tx_ended)?;
                overlay.write(key, value);
            }
            None => {
                let mut shared = self.shared.lock().expect("memory table lock poisoned");
                shared.unindex(key);
                shared.store(key, value);
            }
        }
        Ok(())
    }

    pub(crate) fn commit(&self) -> Result<()> {
        let overlay = self.take_overlay()?;
        let mut shared = self.shared.lock().expect("memory table lock poisoned");

        for (key, row) in overlay
            .writes
            .iter()
            .filter_map(|(key, value)| Some((*key, value.as_ref()?)))
        {
            let Some(unique_key) = row.unique_key() else {
                continue;
            };
            // rows rewritten by this transaction give up their old keys
            let taken = shared
                .holder(&unique_key)
                .is_some_and(|holder| holder != key && !overlay.writes.contains_key(&holder));
            if taken {
                return Err(EtcError::Transaction(format!(
                    "commit rejected: {}",
                    row.conflict_message()
                )));
            }
        }

        for key in overlay.writes.keys() {
            shared.unindex(*key);
        }
        for (key, value) in overlay.writes {
            shared.store(key, value);
        }
        Ok(())
    }

    pub(crate) fn rollback(&self) -> Result<()> {
        self.take_overlay().map(|_| ())
    }

    fn take_overlay(&self) -> Result<Overlay<V>> {
        let slot = self
            .overlay
            .as_ref()
            .ok_or_else(|| EtcError::Transaction("no transaction in progress".into()))?;
        let mut guard = slot.lock().expect("memory overlay lock poisoned");
        guard.take().ok_or_else(tx_ended)
    }
}

fn tx_ended() -> EtcError {
    EtcError::Transaction("transaction already committed or rolled back".into())
}

/// Slice `rows` to one page.
pub(crate) fn paginate<V>(rows: Vec<V>, offset: u32, limit: u32) -> Vec<V> {
    rows.into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}
