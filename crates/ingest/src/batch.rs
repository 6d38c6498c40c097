//! Batch import of already-typed records.
//!
//! Records are split into consecutive batches; each batch runs in its own
//! transaction. Batches that committed stay committed when a later one
//! fails.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

use etc_core::config::ImportConfig;
use etc_core::validate::validate_at;
use etc_core::{ErrorKind, EtcError, EtcRecord, Result, TollFields, ValidationError};
use etc_storage::{run_guarded, RecordGateway};

use crate::pipeline::ImportPipeline;

pub const MAX_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Records per transaction, 1 to 10 000.
    pub batch_size: usize,
    /// Record failures and keep going instead of returning the first one.
    pub continue_on_error: bool,
}

impl BatchOptions {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            continue_on_error: false,
        }
    }

    fn check(&self) -> Result<(), ValidationError> {
        if (1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            Ok(())
        } else {
            Err(ValidationError::new(
                "batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}, got {}", self.batch_size),
            ))
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default())
    }
}

/// A record, or a whole batch, that did not make it in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    /// Index into the input; for a batch-level failure, its first record.
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

impl BatchFailure {
    fn new(index: usize, error: &EtcError) -> Self {
        Self {
            index,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub batches: usize,
    pub created: usize,
    pub duplicates: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Default)]
struct BatchOutcome {
    created: usize,
    duplicates: usize,
    failures: Vec<BatchFailure>,
}

impl ImportPipeline {
    /// Persist `records` in batches of `options.batch_size`.
    ///
    /// Without `continue_on_error` the first failure rolls back its batch
    /// and is returned. With it, failing records are listed in the report,
    /// and a batch whose transaction cannot begin or commit is listed once
    /// at its first index.
    pub async fn process_batch(
        &self,
        records: Vec<TollFields>,
        options: BatchOptions,
    ) -> Result<BatchReport> {
        options.check()?;
        let today = Local::now().date_naive();
        let mut report = BatchReport {
            total: records.len(),
            ..BatchReport::default()
        };

        for (n, chunk) in records.chunks(options.batch_size).enumerate() {
            let offset = n * options.batch_size;
            match self
                .run_batch(chunk, offset, today, options.continue_on_error)
                .await
            {
                Ok(outcome) => {
                    report.created += outcome.created;
                    report.duplicates += outcome.duplicates;
                    report.failures.extend(outcome.failures);
                }
                Err(e) if options.continue_on_error => {
                    warn!(batch = n, error = %e, "batch rolled back");
                    report.failures.push(BatchFailure::new(offset, &e));
                }
                Err(e) => {
                    warn!(batch = n, error = %e, "batch aborted");
                    return Err(e);
                }
            }
            report.batches += 1;
        }

        info!(
            total = report.total,
            batches = report.batches,
            created = report.created,
            duplicates = report.duplicates,
            failures = report.failures.len(),
            "batch import finished"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        chunk: &[TollFields],
        offset: usize,
        today: NaiveDate,
        continue_on_error: bool,
    ) -> Result<BatchOutcome> {
        let tx = self.records.begin_tx().await?;
        run_guarded(tx.as_ref(), async {
            let mut outcome = BatchOutcome::default();
            for (i, fields) in chunk.iter().enumerate() {
                match persist_one(tx.as_ref(), fields, today).await {
                    Ok(true) => outcome.created += 1,
                    Ok(false) => outcome.duplicates += 1,
                    Err(e) if continue_on_error => {
                        outcome.failures.push(BatchFailure::new(offset + i, &e));
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(outcome)
        })
        .await
    }
}

/// `Ok(true)` when created, `Ok(false)` when a live duplicate exists.
async fn persist_one(
    tx: &dyn RecordGateway,
    fields: &TollFields,
    today: NaiveDate,
) -> Result<bool> {
    validate_at(fields, today)?;
    let record = EtcRecord::new(fields.clone());
    if tx.check_duplicate_fingerprint(record.fingerprint(), &[]).await? {
        return Ok(false);
    }
    match tx.create(&record).await {
        Ok(()) => Ok(true),
        Err(EtcError::Duplicate(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use etc_storage::{MemoryRecordGateway, RecordFilter};

    use super::*;

    fn fields(minute: u32) -> TollFields {
        TollFields {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            time: format!("10:{minute:02}:00"),
            entrance_ic: "大阪IC".to_string(),
            exit_ic: "京都南IC".to_string(),
            toll_amount: 930,
            car_number: "なにわ 500 さ 98-76".to_string(),
            etc_card_number: "9876543210987654".to_string(),
            device_id: None,
        }
    }

    fn invalid() -> TollFields {
        TollFields {
            toll_amount: -1,
            ..fields(59)
        }
    }

    fn opts(batch_size: usize, continue_on_error: bool) -> BatchOptions {
        BatchOptions {
            batch_size,
            continue_on_error,
        }
    }

    fn setup() -> (Arc<MemoryRecordGateway>, ImportPipeline) {
        let gateway = Arc::new(MemoryRecordGateway::new());
        let pipeline = ImportPipeline::new(gateway.clone(), ImportConfig::default());
        (gateway, pipeline)
    }

    async fn stored(gateway: &MemoryRecordGateway) -> u64 {
        gateway.list(&RecordFilter::default()).await.unwrap().total
    }

    #[tokio::test]
    async fn batch_size_bounds() {
        let (_, pipeline) = setup();
        for size in [0, MAX_BATCH_SIZE + 1] {
            let err = pipeline
                .process_batch(vec![fields(0)], opts(size, false))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(pipeline
            .process_batch(vec![], opts(MAX_BATCH_SIZE, false))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn splits_into_sequential_batches() {
        let (gateway, pipeline) = setup();
        let records: Vec<_> = (0..5).map(fields).chain([fields(0)]).collect();

        let report = pipeline
            .process_batch(records, opts(2, false))
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.created, 5);
        assert_eq!(report.duplicates, 1);
        assert_eq!(stored(&gateway).await, 5);
    }

    #[tokio::test]
    async fn abort_rolls_back_failing_batch_only() {
        let (gateway, pipeline) = setup();
        let records = vec![fields(0), fields(1), fields(2), invalid()];

        let err = pipeline
            .process_batch(records, opts(2, false))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(stored(&gateway).await, 2);
    }

    #[tokio::test]
    async fn continue_accumulates_failures() {
        let (gateway, pipeline) = setup();
        let records = vec![fields(0), invalid(), fields(2), invalid()];

        let report = pipeline
            .process_batch(records, opts(3, true))
            .await
            .unwrap();

        assert_eq!(report.created, 2);
        let indexes: Vec<_> = report.failures.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![1, 3]);
        assert!(report.failures.iter().all(|f| f.kind == ErrorKind::Validation));
        assert_eq!(stored(&gateway).await, 2);
    }

    #[tokio::test]
    async fn continue_records_failed_commit_per_batch() {
        let (gateway, pipeline) = setup();
        gateway.faults().fail_commit(true);

        let report = pipeline
            .process_batch((0..4).map(fields).collect(), opts(2, true))
            .await
            .unwrap();

        assert_eq!(report.created, 0);
        let indexes: Vec<_> = report.failures.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert!(report.failures.iter().all(|f| f.kind == ErrorKind::Transaction));
        assert_eq!(stored(&gateway).await, 0);
    }
}
