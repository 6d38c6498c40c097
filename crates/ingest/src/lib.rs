//! Toll record ingestion: CSV parsing, import sessions, the import
//! pipeline and its batch variant, and record maintenance.

pub mod batch;
pub mod error;
pub mod parse;
pub mod pipeline;
pub mod row;
pub mod service;
pub mod session;
pub mod store;

pub use batch::{BatchFailure, BatchOptions, BatchReport, MAX_BATCH_SIZE};
pub use error::ImportError;
pub use pipeline::ImportPipeline;
pub use row::{RowError, RowErrorKind};
pub use service::RecordService;
pub use session::{ImportSession, ImportSource, ImportStatus, SessionId};
pub use store::SessionStore;
