//! Transactional mapping operations.
//!
//! Status changes follow [`etc_core::ALLOWED_TRANSITIONS`]. A record has at
//! most one `active` mapping; every path that can produce an active mapping
//! checks for another one inside the transaction, and the store's uniqueness
//! rule backs that check up.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use etc_core::{EtcError, Mapping, MappingId, MappingStatus, RecordId, Result};
use etc_storage::{run_guarded, MappingFilter, MappingGateway, RecordGateway};

use crate::params::{CreateMapping, UpdateMapping, DEFAULT_CONFIDENCE, DEFAULT_STATUS};

pub struct MappingService {
    records: Arc<dyn RecordGateway>,
    mappings: Arc<dyn MappingGateway>,
}

impl MappingService {
    pub fn new(records: Arc<dyn RecordGateway>, mappings: Arc<dyn MappingGateway>) -> Self {
        Self { records, mappings }
    }

    pub async fn create_mapping(&self, params: CreateMapping) -> Result<Mapping> {
        params.validate()?;
        let now = Utc::now();
        let mapping = Mapping {
            id: Uuid::new_v4(),
            record_id: params.record_id,
            entity_id: params.entity_id,
            entity_type: params.entity_type,
            mapping_type: params.mapping_type,
            confidence: params.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            status: params.status.unwrap_or(DEFAULT_STATUS),
            metadata: params
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            created_by: params.created_by,
            created_at: now,
            updated_at: now,
        };

        let tx = self.mappings.begin_tx().await?;
        run_guarded(tx.as_ref(), async {
            if self.records.get_by_id(mapping.record_id).await?.is_none() {
                return Err(EtcError::not_found("record", mapping.record_id));
            }
            // any new mapping is refused while the record has an active one
            ensure_no_other_active(tx.as_ref(), mapping.record_id, None).await?;
            tx.create(&mapping).await
        })
        .await?;

        info!(
            mapping_id = %mapping.id,
            record_id = %mapping.record_id,
            status = %mapping.status,
            "mapping created"
        );
        Ok(mapping)
    }

    /// Apply the provided fields. The transition table is consulted only
    /// when the status actually changes.
    pub async fn update_mapping(&self, id: MappingId, patch: UpdateMapping) -> Result<Mapping> {
        patch.validate()?;
        let tx = self.mappings.begin_tx().await?;
        let updated = run_guarded(tx.as_ref(), async {
            let mut mapping = load(tx.as_ref(), id).await?;
            if let Some(to) = patch.status.filter(|&s| s != mapping.status) {
                enter_status(tx.as_ref(), &mapping, to).await?;
                mapping.status = to;
            }
            if let Some(v) = patch.entity_id {
                mapping.entity_id = v;
            }
            if let Some(v) = patch.entity_type {
                mapping.entity_type = v;
            }
            if let Some(v) = patch.mapping_type {
                mapping.mapping_type = v;
            }
            if let Some(v) = patch.confidence {
                mapping.confidence = v;
            }
            if let Some(v) = patch.metadata {
                mapping.metadata = v;
            }
            mapping.updated_at = Utc::now();
            tx.update(&mapping).await?;
            Ok(mapping)
        })
        .await?;

        info!(mapping_id = %id, status = %updated.status, "mapping updated");
        Ok(updated)
    }

    /// Move a mapping to `status`. Staying in the same status is refused.
    pub async fn update_status(&self, id: MappingId, status: MappingStatus) -> Result<Mapping> {
        let tx = self.mappings.begin_tx().await?;
        let updated = run_guarded(tx.as_ref(), async {
            let mut mapping = load(tx.as_ref(), id).await?;
            enter_status(tx.as_ref(), &mapping, status).await?;
            mapping.status = status;
            mapping.updated_at = Utc::now();
            tx.update(&mapping).await?;
            Ok(mapping)
        })
        .await?;

        info!(mapping_id = %id, status = %status, "mapping status changed");
        Ok(updated)
    }

    pub async fn delete_mapping(&self, id: MappingId) -> Result<()> {
        let tx = self.mappings.begin_tx().await?;
        run_guarded(tx.as_ref(), async {
            load(tx.as_ref(), id).await?;
            tx.delete(id).await
        })
        .await?;
        info!(mapping_id = %id, "mapping deleted");
        Ok(())
    }

    pub async fn get_mapping(&self, id: MappingId) -> Result<Mapping> {
        load(self.mappings.as_ref(), id).await
    }

    pub async fn list_mappings(&self, filter: &MappingFilter) -> Result<Vec<Mapping>> {
        self.mappings.list(filter).await
    }

    pub async fn active_mapping_for(&self, record_id: RecordId) -> Result<Option<Mapping>> {
        self.mappings.get_active_mapping(record_id).await
    }
}

async fn load(gateway: &dyn MappingGateway, id: MappingId) -> Result<Mapping> {
    gateway
        .get_by_id(id)
        .await?
        .ok_or_else(|| EtcError::not_found("mapping", id))
}

/// Check that `mapping` may move to `to`.
async fn enter_status(
    tx: &dyn MappingGateway,
    mapping: &Mapping,
    to: MappingStatus,
) -> Result<()> {
    mapping.status.check_transition(to)?;
    if to == MappingStatus::Active {
        ensure_no_other_active(tx, mapping.record_id, Some(mapping.id)).await?;
    }
    Ok(())
}

async fn ensure_no_other_active(
    tx: &dyn MappingGateway,
    record_id: RecordId,
    except: Option<MappingId>,
) -> Result<()> {
    match tx.get_active_mapping(record_id).await? {
        Some(active) if Some(active.id) != except => Err(EtcError::Duplicate(format!(
            "record {record_id} already has active mapping {}",
            active.id
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests;
