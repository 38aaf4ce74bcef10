pub mod config;
pub mod error;
pub mod types;

pub use config::{LabelbookConfig, StorePaths};
pub use error::{LabelbookError, Result};
pub use types::*;
