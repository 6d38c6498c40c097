//! Maintenance of stored records: lookups, corrections, soft deletion.

use std::sync::Arc;

use tracing::info;

use etc_core::validate::validate;
use etc_core::{EtcError, EtcRecord, RecordId, Result, TollFields};
use etc_storage::{run_guarded, RecordFilter, RecordGateway, RecordPage};

pub struct RecordService {
    records: Arc<dyn RecordGateway>,
}

impl RecordService {
    pub fn new(records: Arc<dyn RecordGateway>) -> Self {
        Self { records }
    }

    pub async fn get_record(&self, id: RecordId) -> Result<EtcRecord> {
        self.records
            .get_by_id(id)
            .await?
            .ok_or_else(|| EtcError::not_found("record", id))
    }

    pub async fn list_records(&self, filter: &RecordFilter) -> Result<RecordPage> {
        self.records.list(filter).await
    }

    /// Replace a record's content. The fingerprint is regenerated and must
    /// not collide with any other live record.
    pub async fn update_record(&self, id: RecordId, fields: TollFields) -> Result<EtcRecord> {
        validate(&fields)?;
        let tx = self.records.begin_tx().await?;
        let updated = run_guarded(tx.as_ref(), async {
            let mut record = tx
                .get_by_id(id)
                .await?
                .ok_or_else(|| EtcError::not_found("record", id))?;
            record.set_fields(fields);
            if tx
                .check_duplicate_fingerprint(record.fingerprint(), &[id])
                .await?
            {
                return Err(EtcError::Duplicate(format!(
                    "another record already has fingerprint {}",
                    record.fingerprint()
                )));
            }
            tx.update(&record).await?;
            Ok(record)
        })
        .await?;
        info!(record_id = %id, "record updated");
        Ok(updated)
    }

    /// Soft delete. The fingerprint becomes free for new records.
    pub async fn delete_record(&self, id: RecordId) -> Result<()> {
        let tx = self.records.begin_tx().await?;
        run_guarded(tx.as_ref(), async {
            if tx.get_by_id(id).await?.is_none() {
                return Err(EtcError::not_found("record", id));
            }
            tx.delete(id).await
        })
        .await?;
        info!(record_id = %id, "record deleted");
        Ok(())
    }
}
