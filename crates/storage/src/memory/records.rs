use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use etc_core::{EtcError, EtcRecord, RecordId, Result};

use super::{paginate, MemoryFaults, Row, Table};
use crate::gateway::{RecordFilter, RecordGateway, RecordPage, Transactional};

impl Row for EtcRecord {
    fn key(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<String> {
        (!self.is_deleted()).then(|| self.fingerprint().to_owned())
    }

    fn conflict_message(&self) -> String {
        format!("record with fingerprint {} already exists", self.fingerprint())
    }
}

/// In-memory [`RecordGateway`].
pub struct MemoryRecordGateway {
    table: Table<EtcRecord>,
    faults: Arc<MemoryFaults>,
}

impl MemoryRecordGateway {
    pub fn new() -> Self {
        Self {
            table: Table::new(),
            faults: Arc::new(MemoryFaults::default()),
        }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn faults(&self) -> &MemoryFaults {
        &self.faults
    }

    fn live(&self, id: RecordId) -> Result<Option<EtcRecord>> {
        Ok(self.table.get(id)?.filter(|r| !r.is_deleted()))
    }
}

impl Default for MemoryRecordGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transactional for MemoryRecordGateway {
    async fn commit_tx(&self) -> Result<()> {
        if let Err(e) = self.faults.check_commit() {
            self.table.rollback()?;
            return Err(e);
        }
        self.table.commit()
    }

    async fn rollback_tx(&self) -> Result<()> {
        self.table.rollback()
    }
}

#[async_trait]
impl RecordGateway for MemoryRecordGateway {
    async fn create(&self, record: &EtcRecord) -> Result<()> {
        self.faults.check_create(record.fingerprint())?;
        if self.table.get(record.id)?.is_some() {
            return Err(EtcError::Duplicate(format!("record {} already exists", record.id)));
        }
        self.table.put(record.clone())
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<EtcRecord>> {
        self.live(id)
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<EtcRecord>> {
        self.table.find_unique(fingerprint)
    }

    async fn update(&self, record: &EtcRecord) -> Result<()> {
        if self.live(record.id)?.is_none() {
            return Err(EtcError::not_found("record", record.id));
        }
        let mut updated = record.clone();
        updated.updated_at = Utc::now();
        self.table.put(updated)
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        let mut record = self
            .live(id)?
            .ok_or_else(|| EtcError::not_found("record", id))?;
        record.mark_deleted();
        self.table.put(record)
    }

    async fn check_duplicate_fingerprint(
        &self,
        fingerprint: &str,
        exclude_ids: &[RecordId],
    ) -> Result<bool> {
        Ok(self
            .table
            .find_unique(fingerprint)?
            .is_some_and(|r| !exclude_ids.contains(&r.id)))
    }

    async fn list(&self, filter: &RecordFilter) -> Result<RecordPage> {
        let mut matched: Vec<EtcRecord> = self
            .table
            .rows()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        matched.sort_by(|a, b| {
            let (fa, fb) = (a.fields(), b.fields());
            fb.date.cmp(&fa.date).then_with(|| fb.time.cmp(&fa.time))
        });
        let total = matched.len() as u64;
        Ok(RecordPage {
            records: paginate(matched, filter.page_offset(), filter.page_size()),
            total,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn begin_tx(&self) -> Result<Arc<dyn RecordGateway>> {
        self.faults.check_begin()?;
        Ok(Arc::new(Self {
            table: self.table.begin()?,
            faults: Arc::clone(&self.faults),
        }))
    }
}
