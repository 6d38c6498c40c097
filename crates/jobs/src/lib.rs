//! Background bulk acquisition of toll statements, one task per job.

pub mod client;
pub mod error;
pub mod job;
pub mod tracker;

pub use client::{Account, AcquiredFile, AcquisitionClient, ClientFactory};
pub use error::JobError;
pub use job::{Job, JobStatus};
pub use tracker::JobTracker;
