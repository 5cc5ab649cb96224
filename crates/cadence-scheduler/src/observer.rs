use std::time::Duration;

use cadence_core::{JobKey, TriggerKey};
use tracing::{debug, error, warn};

use crate::error::SchedulerError;

/// Receives execution outcomes from the engine.
///
/// Calls are made from the dispatch loop and from execution tasks, so
/// implementations must be cheap and must not block. Anything slow belongs on
/// a channel or a spawned task.
pub trait ExecutionObserver: Send + Sync {
    /// A firing was abandoned: the job could not be resolved, returned an
    /// error, or panicked.
    fn report_execution_failure(&self, job: &JobKey, error: &SchedulerError);

    /// A fire of a non-concurrent job was dropped because an earlier
    /// execution was still running.
    fn report_misfire_skip(&self, job: &JobKey, trigger: &TriggerKey);

    fn report_execution_success(&self, _job: &JobKey, _elapsed: Duration) {}
}

/// Default observer: writes every report to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn report_execution_failure(&self, job: &JobKey, err: &SchedulerError) {
        error!(job = %job, code = err.code(), error = %err, "job execution failed");
    }

    fn report_misfire_skip(&self, job: &JobKey, trigger: &TriggerKey) {
        warn!(job = %job, trigger = %trigger, "previous run still in progress, fire skipped");
    }

    fn report_execution_success(&self, job: &JobKey, elapsed: Duration) {
        debug!(job = %job, duration_ms = elapsed.as_millis() as u64, "job completed");
    }
}
