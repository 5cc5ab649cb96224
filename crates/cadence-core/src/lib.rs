//! Shared building blocks for the cadence scheduler crates: job and trigger
//! identity keys, configuration loading and the core error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CadenceConfig, JobConfig, SchedulerConfig};
pub use error::{CoreError, Result};
pub use types::{JobKey, TriggerKey};
