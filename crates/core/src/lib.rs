pub mod config;
pub mod error;
pub mod fingerprint;
pub mod mapping;
pub mod record;
pub mod retry;
pub mod validate;

pub use config::Config;
pub use error::*;
pub use mapping::*;
pub use record::*;
