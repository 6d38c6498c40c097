use std::sync::Arc;

use async_trait::async_trait;

use etc_core::config::ImportConfig;
use etc_core::{fingerprint::fingerprint, EtcError, EtcRecord, ErrorKind, RecordId, Result};
use etc_storage::{MemoryRecordGateway, RecordFilter, RecordGateway, RecordPage, Transactional};

use super::*;
use crate::parse::{parse_row, read_rows};
use crate::row::RowErrorKind;
use crate::session::{ImportSource, ImportStatus};

const HEADER: &str = "date,time,entrance_ic,exit_ic,toll_amount,car_number,etc_card_number";

fn line(time: &str, amount: &str) -> String {
    format!("2024-03-15,{time},東京IC,横浜町田IC,{amount},品川 300 あ 12-34,1234567890123456")
}

fn csv(rows: &[String]) -> Vec<u8> {
    let mut out = String::from(HEADER);
    for row in rows {
        out.push('\n');
        out.push_str(row);
    }
    out.push('\n');
    out.into_bytes()
}

fn source() -> ImportSource {
    ImportSource {
        account_id: "acct-1".into(),
        account_type: "corporate".into(),
        file_name: "march.csv".into(),
        file_size: 0,
    }
}

fn pipeline_over(gateway: Arc<dyn RecordGateway>) -> ImportPipeline {
    ImportPipeline::new(gateway, ImportConfig::default())
}

async fn stored(gateway: &dyn RecordGateway) -> u64 {
    gateway.list(&RecordFilter::default()).await.unwrap().total
}

#[tokio::test]
async fn clean_import() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(gateway.clone());

    let data = csv(&[line("08:30:00", "1320"), line("09:45:00", "980")]);
    let session = pipeline.import_csv(source(), &data).await.unwrap();

    assert_eq!(session.status, ImportStatus::Completed);
    assert_eq!((session.total, session.success, session.error, session.duplicate), (2, 2, 0, 0));
    assert_eq!(session.file_size, data.len() as u64);
    assert!(session.counters_consistent());
    assert_eq!(stored(gateway.as_ref()).await, 2);
}

#[tokio::test]
async fn repeated_row_is_a_duplicate() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(gateway.clone());

    let a = line("08:30:00", "1320");
    let session = pipeline.import_csv(source(), &csv(&[a.clone(), a])).await.unwrap();

    assert_eq!((session.total, session.success, session.duplicate, session.error), (2, 1, 1, 0));
    assert!(session.row_errors.is_empty());
    assert_eq!(stored(gateway.as_ref()).await, 1);
}

#[tokio::test]
async fn reimport_finds_existing_records() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(gateway.clone());
    let data = csv(&[line("08:30:00", "1320"), line("09:45:00", "980")]);

    pipeline.import_csv(source(), &data).await.unwrap();
    let second = pipeline.import_csv(source(), &data).await.unwrap();

    assert_eq!((second.success, second.duplicate), (0, 2));
    assert_eq!(stored(gateway.as_ref()).await, 2);
}

#[tokio::test]
async fn malformed_amount_is_a_row_error() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(gateway.clone());

    let data = csv(&[line("08:30:00", "1320"), line("09:45:00", "abc")]);
    let session = pipeline.import_csv(source(), &data).await.unwrap();

    assert_eq!(session.status, ImportStatus::Completed);
    assert_eq!((session.success, session.error), (1, 1));
    assert_eq!(session.row_errors.len(), 1);
    let err = &session.row_errors[0];
    assert_eq!(err.kind, RowErrorKind::ParseError);
    assert_eq!(err.row, 3);
    assert!(err.raw.contains("abc"));
    assert!(session.counters_consistent());
}

#[tokio::test]
async fn mixed_file_keeps_counters_consistent() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(gateway.clone());

    let data = csv(&[
        line("08:30:00", "1320"),
        "2024-03-15,08:31:00,東京IC".to_string(),
        line("24:00:00", "1320"),
        line("08:30:00", "1320"),
        line("10:00:00", "2000"),
    ]);
    let session = pipeline.import_csv(source(), &data).await.unwrap();

    assert_eq!(session.total, 5);
    assert_eq!(session.processed, 5);
    assert_eq!((session.success, session.duplicate, session.error), (2, 1, 2));
    let kinds: Vec<_> = session.row_errors.iter().map(|e| (e.row, e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (3, RowErrorKind::InsufficientFields),
            (4, RowErrorKind::ValidationError)
        ]
    );
    assert!(session.counters_consistent());
}

#[tokio::test]
async fn header_only_completes_empty() {
    let pipeline = pipeline_over(Arc::new(MemoryRecordGateway::new()));
    let session = pipeline.import_csv(source(), &csv(&[])).await.unwrap();
    assert_eq!(session.status, ImportStatus::Completed);
    assert_eq!(session.total, 0);
    assert!(session.counters_consistent());
}

#[tokio::test]
async fn create_failure_is_a_creation_error() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let bad = line("09:45:00", "980");
    let fields = parse_row(&read_rows(&csv(&[bad.clone()]))[0]).unwrap();
    gateway.faults().fail_create_for(fingerprint(&fields));
    let pipeline = pipeline_over(gateway.clone());

    let session = pipeline
        .import_csv(source(), &csv(&[line("08:30:00", "1320"), bad]))
        .await
        .unwrap();

    assert_eq!(session.status, ImportStatus::Completed);
    assert_eq!((session.success, session.error), (1, 1));
    assert_eq!(session.row_errors[0].kind, RowErrorKind::CreationError);
    assert_eq!(session.row_errors[0].row, 3);
    assert_eq!(stored(gateway.as_ref()).await, 1);
}

#[tokio::test]
async fn begin_failure_fails_session() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    gateway.faults().fail_begin(true);
    let pipeline = pipeline_over(gateway.clone());

    let err = pipeline
        .import_csv(source(), &csv(&[line("08:30:00", "1320")]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transaction);
    let session = err.session().unwrap();
    assert_eq!(session.status, ImportStatus::Failed);
    assert!(session.failure.is_some());
    assert!(session.counters_consistent());
    assert_eq!(pipeline.sessions().get(session.id).unwrap().status, ImportStatus::Failed);
}

#[tokio::test]
async fn commit_failure_persists_nothing() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    gateway.faults().fail_commit(true);
    let pipeline = pipeline_over(gateway.clone());

    let err = pipeline
        .import_csv(source(), &csv(&[line("08:30:00", "1320"), line("09:00:00", "500")]))
        .await
        .unwrap_err();

    let session = err.session().unwrap();
    assert_eq!(session.status, ImportStatus::Failed);
    assert!(session.counters_consistent());
    assert_eq!(stored(gateway.as_ref()).await, 0);
}

#[tokio::test]
async fn panic_during_write_rolls_back() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    gateway.faults().panic_on_create(true);
    let pipeline = pipeline_over(gateway.clone());

    let err = pipeline
        .import_csv(source(), &csv(&[line("08:30:00", "1320")]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transaction);
    assert!(err.to_string().contains("injected panic"));
    assert_eq!(err.session().unwrap().status, ImportStatus::Failed);
    gateway.faults().panic_on_create(false);
    assert_eq!(stored(gateway.as_ref()).await, 0);
}

#[tokio::test]
async fn oversized_input_fails_before_reading() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let pipeline = ImportPipeline::new(
        gateway.clone(),
        ImportConfig {
            max_file_mb: 0,
            ..ImportConfig::default()
        },
    );

    let err = pipeline
        .import_csv(source(), &csv(&[line("08:30:00", "1320")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.session().unwrap().status, ImportStatus::Failed);
}

#[tokio::test]
async fn cancelled_pending_session_never_runs() {
    let gateway = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(gateway.clone());

    let session = pipeline.create_session(source());
    pipeline.sessions().cancel(session.id).unwrap();

    let err = pipeline
        .execute_session(session.id, &csv(&[line("08:30:00", "1320")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Rejected(EtcError::Validation(_))));
    assert_eq!(pipeline.sessions().get(session.id).unwrap().status, ImportStatus::Cancelled);
    assert_eq!(stored(gateway.as_ref()).await, 0);
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let pipeline = pipeline_over(Arc::new(MemoryRecordGateway::new()));
    let err = pipeline
        .execute_session(SessionId::new_v4(), &csv(&[]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.session().is_none());
}

/// Requests cancellation of every running session on its first write.
struct CancelOnCreate {
    inner: Arc<dyn RecordGateway>,
    sessions: SessionStore,
}

#[async_trait]
impl Transactional for CancelOnCreate {
    async fn commit_tx(&self) -> Result<()> {
        self.inner.commit_tx().await
    }

    async fn rollback_tx(&self) -> Result<()> {
        self.inner.rollback_tx().await
    }
}

#[async_trait]
impl RecordGateway for CancelOnCreate {
    async fn create(&self, record: &EtcRecord) -> Result<()> {
        for session in self.sessions.list() {
            if session.status == ImportStatus::Processing {
                self.sessions.cancel(session.id)?;
            }
        }
        self.inner.create(record).await
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<EtcRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<EtcRecord>> {
        self.inner.get_by_fingerprint(fingerprint).await
    }

    async fn update(&self, record: &EtcRecord) -> Result<()> {
        self.inner.update(record).await
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn check_duplicate_fingerprint(
        &self,
        fingerprint: &str,
        exclude_ids: &[RecordId],
    ) -> Result<bool> {
        self.inner.check_duplicate_fingerprint(fingerprint, exclude_ids).await
    }

    async fn list(&self, filter: &RecordFilter) -> Result<RecordPage> {
        self.inner.list(filter).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn begin_tx(&self) -> Result<Arc<dyn RecordGateway>> {
        Ok(Arc::new(CancelOnCreate {
            inner: self.inner.begin_tx().await?,
            sessions: self.sessions.clone(),
        }))
    }
}

#[tokio::test]
async fn cancellation_mid_import_rolls_back() {
    let memory: Arc<dyn RecordGateway> = Arc::new(MemoryRecordGateway::new());
    let sessions = SessionStore::new();
    let gateway = Arc::new(CancelOnCreate {
        inner: memory.clone(),
        sessions: sessions.clone(),
    });
    let pipeline = pipeline_over(gateway).with_sessions(sessions);

    let err = pipeline
        .import_csv(source(), &csv(&[line("08:30:00", "1320"), line("09:00:00", "500")]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let session = err.session().unwrap();
    assert_eq!(session.status, ImportStatus::Cancelled);
    assert_eq!(session.success, 1);
    assert!(session.counters_consistent());
    assert_eq!(stored(memory.as_ref()).await, 0);
}

/// Duplicate lookups never match, so repeats reach the store's unique check.
struct MissedLookup {
    inner: Arc<dyn RecordGateway>,
}

#[async_trait]
impl Transactional for MissedLookup {
    async fn commit_tx(&self) -> Result<()> {
        self.inner.commit_tx().await
    }

    async fn rollback_tx(&self) -> Result<()> {
        self.inner.rollback_tx().await
    }
}

#[async_trait]
impl RecordGateway for MissedLookup {
    async fn create(&self, record: &EtcRecord) -> Result<()> {
        self.inner.create(record).await
    }

    async fn get_by_id(&self, id: RecordId) -> Result<Option<EtcRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_fingerprint(&self, _fingerprint: &str) -> Result<Option<EtcRecord>> {
        Ok(None)
    }

    async fn update(&self, record: &EtcRecord) -> Result<()> {
        self.inner.update(record).await
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn check_duplicate_fingerprint(
        &self,
        _fingerprint: &str,
        _exclude_ids: &[RecordId],
    ) -> Result<bool> {
        Ok(false)
    }

    async fn list(&self, filter: &RecordFilter) -> Result<RecordPage> {
        self.inner.list(filter).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn begin_tx(&self) -> Result<Arc<dyn RecordGateway>> {
        Ok(Arc::new(MissedLookup {
            inner: self.inner.begin_tx().await?,
        }))
    }
}

#[tokio::test]
async fn duplicate_refused_at_create_counts_as_duplicate() {
    let memory: Arc<dyn RecordGateway> = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(Arc::new(MissedLookup {
        inner: memory.clone(),
    }));

    let a = line("08:30:00", "1320");
    let session = pipeline
        .import_csv(source(), &csv(&[a.clone(), line("09:00:00", "500"), a]))
        .await
        .unwrap();

    assert_eq!(session.status, ImportStatus::Completed);
    assert_eq!((session.total, session.success, session.duplicate, session.error), (3, 2, 1, 0));
    assert!(session.row_errors.is_empty());
    assert!(session.counters_consistent());
    assert_eq!(stored(memory.as_ref()).await, 2);
}

#[tokio::test]
async fn batch_counts_duplicate_refused_at_create() {
    let memory: Arc<dyn RecordGateway> = Arc::new(MemoryRecordGateway::new());
    let pipeline = pipeline_over(Arc::new(MissedLookup {
        inner: memory.clone(),
    }));
    let fields = parse_row(&read_rows(&csv(&[line("08:30:00", "1320")]))[0]).unwrap();

    let options = crate::batch::BatchOptions {
        batch_size: 10,
        continue_on_error: false,
    };
    let report = pipeline
        .process_batch(vec![fields.clone(), fields], options)
        .await
        .unwrap();

    assert_eq!((report.created, report.duplicates), (1, 1));
    assert!(report.failures.is_empty());
    assert_eq!(stored(memory.as_ref()).await, 1);
}
