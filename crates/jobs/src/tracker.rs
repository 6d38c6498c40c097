//! In-memory registry of acquisition jobs and the task that drives each one.
//!
//! A job walks its accounts one after another: build a client, download the
//! statement with retries, import it, then pause before the next account.
//! A failing account is counted and skipped; only a panic fails the job.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use etc_core::config::JobConfig;
use etc_core::retry::retry_with_backoff;
use etc_ingest::{ImportPipeline, ImportSession, ImportSource};
use etc_storage::guard::panic_message;

use crate::client::{Account, ClientFactory};
use crate::error::JobError;
use crate::job::{progress_after, Job, JobStatus};

#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<IndexMap<String, Job>>>,
    factory: Arc<dyn ClientFactory>,
    pipeline: Arc<ImportPipeline>,
    config: JobConfig,
    shutdown: CancellationToken,
}

impl JobTracker {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        pipeline: Arc<ImportPipeline>,
        config: JobConfig,
    ) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(IndexMap::new())),
            factory,
            pipeline,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register `job_id` as processing and run it in the background.
    ///
    /// Returns as soon as the job is registered. An id that is still
    /// processing is refused; a finished one is replaced.
    pub fn process_async(
        &self,
        job_id: impl Into<String>,
        accounts: Vec<Account>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<JoinHandle<()>, JobError> {
        let job_id = job_id.into();
        {
            let mut jobs = self.jobs.write().expect("job map lock poisoned");
            if jobs
                .get(&job_id)
                .is_some_and(|job| job.status == JobStatus::Processing)
            {
                return Err(JobError::AlreadyRunning(job_id));
            }
            jobs.insert(job_id.clone(), Job::started(job_id.clone(), accounts.len(), from, to));
        }
        info!(job_id = %job_id, accounts = accounts.len(), %from, %to, "job started");

        let tracker = self.clone();
        Ok(tokio::spawn(async move {
            tracker.run(job_id, accounts, from, to).await;
        }))
    }

    /// Snapshot of one job.
    pub fn get_job_status(&self, job_id: &str) -> Option<Job> {
        self.jobs
            .read()
            .expect("job map lock poisoned")
            .get(job_id)
            .cloned()
    }

    /// Snapshot of every job, oldest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.jobs
            .read()
            .expect("job map lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Drop finished jobs older than the retention window. Returns how many
    /// were removed.
    pub fn sweep_expired(&self) -> usize {
        let retention = self.config.retention();
        let now = Utc::now();
        let mut jobs = self.jobs.write().expect("job map lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| match job.completed_at {
            Some(done) if job.status.is_terminal() => (now - done)
                .to_std()
                .map_or(true, |age| age < retention),
            _ => true,
        });
        before - jobs.len()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every sweep interval until
    /// [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let interval = tracker.config.sweep_interval();
            loop {
                tokio::select! {
                    _ = tracker.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let removed = tracker.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "expired jobs swept");
                        }
                    }
                }
            }
        })
    }

    /// Stop the sweeper and abandon pending download retries.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run(&self, job_id: String, accounts: Vec<Account>, from: NaiveDate, to: NaiveDate) {
        let outcome = AssertUnwindSafe(self.process_accounts(&job_id, &accounts, from, to))
            .catch_unwind()
            .await;

        match outcome {
            Ok(()) => {
                self.update(&job_id, |job| {
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.completed_at = Some(Utc::now());
                });
                if let Some(job) = self.get_job_status(&job_id) {
                    info!(
                        job_id = %job_id,
                        succeeded = job.succeeded_accounts,
                        failed = job.failed_accounts,
                        imported = job.records_imported,
                        duplicates = job.duplicates,
                        "job completed"
                    );
                }
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(job_id = %job_id, error = %msg, "job panicked");
                self.update(&job_id, |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(msg);
                    job.completed_at = Some(Utc::now());
                });
            }
        }
    }

    async fn process_accounts(
        &self,
        job_id: &str,
        accounts: &[Account],
        from: NaiveDate,
        to: NaiveDate,
    ) {
        let total = accounts.len();
        for (index, account) in accounts.iter().enumerate() {
            let outcome = self.process_account(account, from, to).await;
            match &outcome {
                Ok(session) => debug!(
                    job_id,
                    account = %account.id,
                    imported = session.success,
                    duplicates = session.duplicate,
                    "account imported"
                ),
                Err(e) => warn!(job_id, account = %account.id, error = %e, "account failed"),
            }

            self.update(job_id, |job| {
                job.processed_accounts += 1;
                match &outcome {
                    Ok(session) => {
                        job.succeeded_accounts += 1;
                        job.records_imported += session.success;
                        job.duplicates += session.duplicate;
                    }
                    Err(_) => job.failed_accounts += 1,
                }
                job.progress = progress_after(index, total);
            });

            tokio::time::sleep(self.config.pacing_delay()).await;
        }
    }

    async fn process_account(
        &self,
        account: &Account,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ImportSession, JobError> {
        let client = self.factory.create(account).await?;
        let file = retry_with_backoff(&self.shutdown, self.config.retry_policy(), |_attempt| {
            client.download(account, from, to)
        })
        .await?;

        let source = ImportSource {
            account_id: account.id.clone(),
            account_type: account.account_type.clone(),
            file_name: file.file_name,
            file_size: 0,
        };
        Ok(self.pipeline.import_csv(source, &file.bytes).await?)
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write().expect("job map lock poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            apply(job);
        }
    }
}
