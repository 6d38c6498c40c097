//! A job pulls statements for several accounts into one record store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use etc_core::config::{ImportConfig, JobConfig};
use etc_ingest::{ImportPipeline, ImportStatus};
use etc_jobs::{
    Account, AcquiredFile, AcquisitionClient, ClientFactory, JobError, JobStatus, JobTracker,
};
use etc_storage::{RecordFilter, Storage};

struct Portal;

#[async_trait]
impl AcquisitionClient for Portal {
    async fn download(
        &self,
        account: &Account,
        from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<AcquiredFile, JobError> {
        let card = if account.account_type == "corporate" {
            "1111222233334444"
        } else {
            "5555666677778888"
        };
        let body = format!(
            "date,time,entrance_ic,exit_ic,toll_amount,car_number,etc_card_number\n\
             {from},07:15:00,川崎IC,大井南IC,1050,川崎 500 さ 88-01,{card}\n\
             {from},19:40:00,大井南IC,川崎IC,1050,川崎 500 さ 88-01,{card}\n"
        );
        Ok(AcquiredFile {
            file_name: format!("{}-{from}.csv", account.id),
            bytes: body.into_bytes(),
        })
    }
}

struct PortalFactory;

#[async_trait]
impl ClientFactory for PortalFactory {
    async fn create(&self, _account: &Account) -> Result<Arc<dyn AcquisitionClient>, JobError> {
        Ok(Arc::new(Portal))
    }
}

#[tokio::test(start_paused = true)]
async fn job_fills_the_record_store() {
    let storage = Storage::memory();
    let pipeline = Arc::new(ImportPipeline::new(storage.records.clone(), ImportConfig::default()));
    let tracker = JobTracker::new(Arc::new(PortalFactory), pipeline.clone(), JobConfig::default());

    let accounts = vec![
        Account::new("acct-corp", "corporate"),
        Account::new("acct-home", "personal"),
        Account::new("acct-corp-2", "corporate"),
    ];
    let from = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();

    tracker
        .process_async("nightly", accounts, from, to)
        .unwrap()
        .await
        .unwrap();

    let job = tracker.get_job_status("nightly").unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.succeeded_accounts, 3);
    // the second corporate account sees the same card as the first
    assert_eq!((job.records_imported, job.duplicates), (4, 2));

    let stored = storage.records.list(&RecordFilter::default()).await.unwrap();
    assert_eq!(stored.total, 4);

    let sessions = pipeline.sessions().list();
    assert_eq!(sessions.len(), 3);
    assert!(sessions.iter().all(|s| s.status == ImportStatus::Completed));
    assert!(sessions
        .iter()
        .any(|s| s.account_id == "acct-home" && s.file_name == "acct-home-2024-02-01.csv"));
}
