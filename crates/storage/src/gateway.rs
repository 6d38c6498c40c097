//! Persistence gateway contracts.
//!
//! Every write in the system goes through these traits. A gateway instance
//! is either unscoped (each call stands alone) or scoped to one transaction
//! via `begin_tx`; calls on a scoped instance participate in that transaction
//! until `commit_tx` or `rollback_tx`. Callers own the obligation to end every
//! transaction they begin, which [`crate::guard::run_guarded`] discharges.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use etc_core::{EtcRecord, Mapping, MappingId, MappingStatus, RecordId, Result};

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Ends a transaction started by `begin_tx`.
///
/// Both calls fail with `EtcError::Transaction` on an unscoped instance or on
/// a transaction that already ended.
#[async_trait]
pub trait Transactional: Send + Sync {
    async fn commit_tx(&self) -> Result<()>;
    async fn rollback_tx(&self) -> Result<()>;
}

#[async_trait]
pub trait RecordGateway: Transactional {
    /// Persist a new record. Fails with `Duplicate` if a live record already
    /// carries the same fingerprint.
    async fn create(&self, record: &EtcRecord) -> Result<()>;

    /// Live (non-deleted) record by id.
    async fn get_by_id(&self, id: RecordId) -> Result<Option<EtcRecord>>;

    /// Live record by fingerprint.
    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<EtcRecord>>;

    /// Overwrite a live record. Fails with `NotFound` if absent or deleted.
    async fn update(&self, record: &EtcRecord) -> Result<()>;

    /// Soft delete.
    async fn delete(&self, id: RecordId) -> Result<()>;

    /// Whether a live record other than `exclude_ids` has this fingerprint.
    async fn check_duplicate_fingerprint(
        &self,
        fingerprint: &str,
        exclude_ids: &[RecordId],
    ) -> Result<bool>;

    async fn list(&self, filter: &RecordFilter) -> Result<RecordPage>;

    async fn ping(&self) -> Result<()>;

    async fn begin_tx(&self) -> Result<Arc<dyn RecordGateway>>;
}

#[async_trait]
pub trait MappingGateway: Transactional {
    async fn create(&self, mapping: &Mapping) -> Result<()>;

    async fn get_by_id(&self, id: MappingId) -> Result<Option<Mapping>>;

    /// The mapping in status `active` for this record, if any.
    async fn get_active_mapping(&self, record_id: RecordId) -> Result<Option<Mapping>>;

    async fn update(&self, mapping: &Mapping) -> Result<()>;

    /// Hard delete.
    async fn delete(&self, id: MappingId) -> Result<()>;

    async fn list(&self, filter: &MappingFilter) -> Result<Vec<Mapping>>;

    async fn ping(&self) -> Result<()>;

    async fn begin_tx(&self) -> Result<Arc<dyn MappingGateway>>;
}

// ── Filters ──────────────────────────────────────────────────────────

/// Record query parameters. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Inclusive lower bound.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound.
    pub date_to: Option<NaiveDate>,
    pub car_number: Option<String>,
    pub etc_card_number: Option<String>,
    pub entrance_ic: Option<String>,
    pub exit_ic: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
    /// Page size (default 100, capped at 1000).
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl RecordFilter {
    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn page_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, record: &EtcRecord) -> bool {
        let f = record.fields();
        (self.include_deleted || !record.is_deleted())
            && self.date_from.map_or(true, |d| f.date >= d)
            && self.date_to.map_or(true, |d| f.date <= d)
            && self.car_number.as_ref().map_or(true, |v| &f.car_number == v)
            && self.etc_card_number.as_ref().map_or(true, |v| &f.etc_card_number == v)
            && self.entrance_ic.as_ref().map_or(true, |v| &f.entrance_ic == v)
            && self.exit_ic.as_ref().map_or(true, |v| &f.exit_ic == v)
    }
}

/// One page of records plus the total number of matches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordPage {
    pub records: Vec<EtcRecord>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingFilter {
    pub record_id: Option<RecordId>,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub mapping_type: Option<String>,
    pub status: Option<MappingStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl MappingFilter {
    pub fn for_record(record_id: RecordId) -> Self {
        Self {
            record_id: Some(record_id),
            ..Self::default()
        }
    }

    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn page_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, mapping: &Mapping) -> bool {
        self.record_id.map_or(true, |id| mapping.record_id == id)
            && self.entity_id.as_ref().map_or(true, |v| &mapping.entity_id == v)
            && self.entity_type.as_ref().map_or(true, |v| &mapping.entity_type == v)
            && self.mapping_type.as_ref().map_or(true, |v| &mapping.mapping_type == v)
            && self.status.map_or(true, |s| mapping.status == s)
    }
}
