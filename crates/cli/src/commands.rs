//! Subcommand bodies. Reports go to stdout, diagnostics to the log.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tracing::{info, warn};

use etc_core::fingerprint::fingerprint;
use etc_core::Config;
use etc_ingest::parse::{check_rows, read_rows, ValidRow};
use etc_ingest::{
    BatchOptions, ImportError, ImportPipeline, ImportSession, ImportSource, RowError,
};
use etc_storage::{BackendKind, Storage};

/// Row errors printed per report; the rest are only counted.
const SHOWN_ROW_ERRORS: usize = 20;

pub fn source_for(file: &Path, account_id: String, account_type: String) -> ImportSource {
    ImportSource {
        account_id,
        account_type,
        file_name: file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_size: 0,
    }
}

pub async fn import(config: &Config, file: &Path, source: ImportSource) -> Result<()> {
    let data = read_file(file).await?;
    let storage = open_storage(config).await?;
    let pipeline = ImportPipeline::new(storage.records, config.import.clone());

    match pipeline.import_csv(source, &data).await {
        Ok(session) => {
            print_session(&session);
            Ok(())
        }
        Err(ImportError::Aborted { session, source }) => {
            print_session(&session);
            Err(anyhow::Error::new(source)
                .context(format!("import session {} ended {}", session.id, session.status)))
        }
        Err(e) => Err(e).context("import rejected"),
    }
}

pub async fn import_batch(config: &Config, file: &Path, continue_on_error: bool) -> Result<()> {
    let data = read_file(file).await?;
    let (valid, invalid) = check_file(&data).await?;
    print_row_errors(&invalid);

    let storage = open_storage(config).await?;
    let pipeline = ImportPipeline::new(storage.records, config.import.clone());
    let options = BatchOptions {
        continue_on_error,
        ..BatchOptions::from_config(&config.import)
    };
    let report = pipeline
        .process_batch(valid.into_iter().map(|row| row.fields).collect(), options)
        .await
        .context("batch import failed")?;

    println!(
        "batches={} total={} created={} duplicates={} failed={} skipped_rows={}",
        report.batches,
        report.total,
        report.created,
        report.duplicates,
        report.failures.len(),
        invalid.len()
    );
    for failure in &report.failures {
        println!("  record {}: {} ({})", failure.index, failure.message, failure.kind);
    }
    Ok(())
}

pub async fn validate(file: &Path) -> Result<()> {
    let data = read_file(file).await?;
    let (valid, invalid) = check_file(&data).await?;
    print_row_errors(&invalid);
    println!("{} valid, {} invalid", valid.len(), invalid.len());
    Ok(())
}

pub async fn print_fingerprints(file: &Path) -> Result<()> {
    let data = read_file(file).await?;
    let (lines, skipped) = fingerprint_lines(&data).await?;
    for line in &lines {
        println!("{line}");
    }
    if skipped > 0 {
        warn!(skipped, "rows without a fingerprint");
    }
    Ok(())
}

/// `<line>\t<fingerprint>` for each valid row, plus the number of rows skipped.
async fn fingerprint_lines(data: &[u8]) -> Result<(Vec<String>, usize)> {
    let (valid, invalid) = check_file(data).await?;
    let lines = valid
        .iter()
        .map(|row| format!("{}\t{}", row.line, fingerprint(&row.fields)))
        .collect();
    Ok((lines, invalid.len()))
}

pub async fn migrate(config: &Config) -> Result<()> {
    if !config.postgres.is_configured() {
        bail!("PostgreSQL is not configured; set PG_URL or PG_USERNAME");
    }
    let pool = etc_storage::connect(&config.postgres)
        .await
        .context("failed to connect to PostgreSQL")?;
    etc_storage::migrate(&pool)
        .await
        .context("failed to apply migrations")?;
    info!("migrations applied");
    Ok(())
}

async fn read_file(file: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::from_config(&config.postgres)
        .await
        .context("failed to open record store")?;
    if storage.kind == BackendKind::Memory {
        warn!("PostgreSQL not configured; imported records are discarded on exit");
    }
    Ok(storage)
}

/// Parse and validate off the async runtime.
async fn check_file(data: &[u8]) -> Result<(Vec<ValidRow>, Vec<RowError>)> {
    let rows = read_rows(data);
    let today = Local::now().date_naive();
    let checked = tokio::task::spawn_blocking(move || check_rows(rows, today))
        .await
        .context("validation task failed")?;

    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for outcome in checked {
        match outcome {
            Ok(row) => valid.push(row),
            Err(e) => invalid.push(e),
        }
    }
    Ok((valid, invalid))
}

fn print_session(session: &ImportSession) {
    println!(
        "session {} {}: total={} success={} duplicate={} error={}",
        session.id,
        session.status,
        session.total,
        session.success,
        session.duplicate,
        session.error
    );
    if let Some(failure) = &session.failure {
        println!("  failure: {failure}");
    }
    print_row_errors(&session.row_errors);
}

fn print_row_errors(errors: &[RowError]) {
    for e in errors.iter().take(SHOWN_ROW_ERRORS) {
        println!("  {e}");
    }
    if errors.len() > SHOWN_ROW_ERRORS {
        println!("  ... and {} more", errors.len() - SHOWN_ROW_ERRORS);
    }
}
