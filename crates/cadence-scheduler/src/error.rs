use cadence_core::CoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job descriptor failed validation (e.g. blank identity).
    #[error("Invalid job descriptor: {0}")]
    InvalidDescriptor(String),

    /// The trigger failed validation (bad interval, repeat count, cron expression, ...).
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// The job factory could not produce an instance for this job type.
    #[error("Cannot resolve job {job_type}: {reason}")]
    ResolutionFailure { job_type: String, reason: String },

    /// The job's body returned an error or panicked.
    #[error("Job {job} failed: {reason}")]
    ExecutionFailure { job: String, reason: String },

    /// The engine has been shut down and accepts no further work.
    #[error("Scheduler has been shut down")]
    EngineStopped,

    /// The engine was started outside a Tokio runtime.
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Config(#[from] CoreError),
}

impl SchedulerError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidDescriptor(_) => "INVALID_DESCRIPTOR",
            SchedulerError::InvalidTrigger(_) => "INVALID_TRIGGER",
            SchedulerError::ResolutionFailure { .. } => "RESOLUTION_FAILURE",
            SchedulerError::ExecutionFailure { .. } => "EXECUTION_FAILURE",
            SchedulerError::EngineStopped => "ENGINE_STOPPED",
            SchedulerError::Runtime(_) => "RUNTIME_ERROR",
            SchedulerError::Config(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
