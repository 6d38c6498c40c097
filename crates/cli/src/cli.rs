use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Toll record import and maintenance.
#[derive(Parser, Debug)]
#[command(name = "etc-cli", version, about = "ETC toll record import and maintenance")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a statement CSV into the record store.
    Import {
        /// CSV file to import (header line required)
        #[arg(long)]
        file: PathBuf,

        /// Account the statement belongs to
        #[arg(long, env = "ETC_ACCOUNT_ID", default_value = "")]
        account_id: String,

        /// Account type, e.g. corporate or personal
        #[arg(long, env = "ETC_ACCOUNT_TYPE", default_value = "")]
        account_type: String,

        /// Write in batches of IMPORT_BATCH_SIZE, one transaction each
        #[arg(long)]
        batch: bool,

        /// With --batch: keep going past failing records
        #[arg(long, requires = "batch")]
        continue_on_error: bool,
    },

    /// Parse and validate a CSV without writing anything.
    Validate {
        #[arg(long)]
        file: PathBuf,
    },

    /// Print the fingerprint of every valid row.
    Fingerprint {
        #[arg(long)]
        file: PathBuf,
    },

    /// Apply pending PostgreSQL migrations.
    Migrate,
}
