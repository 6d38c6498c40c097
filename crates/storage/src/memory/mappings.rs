use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use etc_core::{EtcError, Mapping, MappingId, MappingStatus, RecordId, Result};

use super::{paginate, MemoryFaults, Row, Table};
use crate::gateway::{MappingFilter, MappingGateway, Transactional};

impl Row for Mapping {
    fn key(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<String> {
        (self.status == MappingStatus::Active).then(|| self.record_id.to_string())
    }

    fn conflict_message(&self) -> String {
        format!("record {} already has an active mapping", self.record_id)
    }
}

/// In-memory [`MappingGateway`].
pub struct MemoryMappingGateway {
    table: Table<Mapping>,
    faults: Arc<MemoryFaults>,
}

impl MemoryMappingGateway {
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
}

impl Default for MemoryMappingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transactional for MemoryMappingGateway {
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
impl MappingGateway for MemoryMappingGateway {
    async fn create(&self, mapping: &Mapping) -> Result<()> {
        if self.table.get(mapping.id)?.is_some() {
            return Err(EtcError::Duplicate(format!("mapping {} already exists", mapping.id)));
        }
        self.table.put(mapping.clone())
    }

    async fn get_by_id(&self, id: MappingId) -> Result<Option<Mapping>> {
        self.table.get(id)
    }

    async fn get_active_mapping(&self, record_id: RecordId) -> Result<Option<Mapping>> {
        self.table.find_unique(&record_id.to_string())
    }

    async fn update(&self, mapping: &Mapping) -> Result<()> {
        if self.table.get(mapping.id)?.is_none() {
            return Err(EtcError::not_found("mapping", mapping.id));
        }
        self.table.put(mapping.clone())
    }

    async fn delete(&self, id: MappingId) -> Result<()> {
        if self.table.get(id)?.is_none() {
            return Err(EtcError::not_found("mapping", id));
        }
        self.table.remove(id)
    }

    async fn list(&self, filter: &MappingFilter) -> Result<Vec<Mapping>> {
        let mut matched: Vec<Mapping> = self
            .table
            .rows()?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matched, filter.page_offset(), filter.page_size()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn begin_tx(&self) -> Result<Arc<dyn MappingGateway>> {
        self.faults.check_begin()?;
        Ok(Arc::new(Self {
            table: self.table.begin()?,
            faults: Arc::clone(&self.faults),
        }))
    }
}
