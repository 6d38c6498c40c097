//! Mapping lifecycle: links from toll records to external entities.

pub mod params;
pub mod service;

pub use params::{CreateMapping, UpdateMapping};
pub use service::MappingService;
