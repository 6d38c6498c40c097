mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use etc_core::config::{load_dotenv, Config};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    load_dotenv();
    let config = Config::from_env();
    config.log_summary();

    match args.command {
        Command::Import {
            file,
            batch,
            continue_on_error,
            ..
        } if batch => commands::import_batch(&config, &file, continue_on_error).await,
        Command::Import {
            file,
            account_id,
            account_type,
            ..
        } => {
            let source = commands::source_for(&file, account_id, account_type);
            commands::import(&config, &file, source).await
        }
        Command::Validate { file } => commands::validate(&file).await,
        Command::Fingerprint { file } => commands::print_fingerprints(&file).await,
        Command::Migrate => commands::migrate(&config).await,
    }
}
