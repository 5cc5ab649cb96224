use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{JobKey, TriggerKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::Job;

/// Whether several instances of one job identity may run at the same time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    #[default]
    Concurrent,
    /// At most one instance per job identity; overlapping fires are dropped.
    NonConcurrent,
}

/// Opaque token naming a job type, used by a [`JobFactory`](crate::factory::JobFactory)
/// to pick the constructor for a firing.
#[derive(Clone, Copy)]
pub struct JobTypeRef {
    id: TypeId,
    name: &'static str,
}

impl JobTypeRef {
    pub fn of<J: Job + 'static>() -> Self {
        Self {
            id: TypeId::of::<J>(),
            name: std::any::type_name::<J>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name. Deterministic for a given build.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for JobTypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JobTypeRef {}

impl fmt::Debug for JobTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobTypeRef").field(&self.name).finish()
    }
}

impl fmt::Display for JobTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What to run. Immutable once built; see [`JobBuilder`](crate::builder::JobBuilder).
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub key: JobKey,
    pub job_type: JobTypeRef,
    pub description: String,
    pub concurrency: ConcurrencyPolicy,
    /// Read-only parameters surfaced to the job on every firing.
    pub job_data: Map<String, Value>,
}

/// How many times a simple schedule repeats after its first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Times(u32),
    Forever,
}

/// UTC wall-clock rules for calendar schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarRule {
    /// Every day at HH:MM.
    Daily { hour: u8, minute: u8 },
    /// On `weekday` (0 = Monday … 6 = Sunday) at HH:MM.
    Weekly { weekday: u8, hour: u8, minute: u8 },
}

/// A parsed cron expression together with its source text.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    pub(crate) fn new(source: String, schedule: cron::Schedule) -> Self {
        Self { source, schedule }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn schedule(&self) -> &cron::Schedule {
        &self.schedule
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// When a trigger fires, once it has started.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulePolicy {
    /// First fire at the start time, then `repeat` more fires `interval` apart.
    Simple {
        repeat: RepeatCount,
        interval: Duration,
    },
    Cron(CronExpression),
    Calendar(CalendarRule),
}

/// When a trigger's schedule begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartCondition {
    #[default]
    Immediate,
    At(DateTime<Utc>),
    /// Relative to the moment the trigger is registered.
    AfterDelay(Duration),
}

impl StartCondition {
    /// Resolve to an absolute instant, measuring delays from `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            StartCondition::Immediate => now,
            StartCondition::At(at) => *at,
            StartCondition::AfterDelay(delay) => chrono::Duration::from_std(*delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// When to run. Immutable once built; see [`TriggerBuilder`](crate::builder::TriggerBuilder).
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    pub key: TriggerKey,
    pub description: String,
    pub policy: SchedulePolicy,
    pub start: StartCondition,
    /// No fire is produced after this instant.
    pub end_at: Option<DateTime<Utc>>,
}

/// Passed to [`Job::execute`] on every firing. Read-only to the job.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    /// The instant this fire was planned for.
    pub scheduled_fire_time: DateTime<Utc>,
    /// The instant the engine actually dispatched it.
    pub fire_time: DateTime<Utc>,
    /// 1-based count of fires this trigger has produced, skipped ones included.
    pub fire_count: u32,
    pub(crate) descriptor: Arc<JobDescriptor>,
}

impl JobExecutionContext {
    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    pub fn job_data(&self) -> &Map<String, Value> {
        &self.descriptor.job_data
    }

    pub fn concurrency(&self) -> ConcurrencyPolicy {
        self.descriptor.concurrency
    }
}

/// Lifecycle state of a scheduler engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Built, or paused via `standby`; registrations accepted, nothing fires.
    Standby,
    /// Evaluating triggers and dispatching jobs.
    Started,
    /// Terminal. Further mutations fail with `EngineStopped`.
    ShutDown,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Standby => "standby",
            EngineState::Started => "started",
            EngineState::ShutDown => "shut_down",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of an engine, for introspection and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub instance_name: String,
    pub state: EngineState,
    pub job_count: usize,
    /// Job instances currently executing, across all identities.
    pub running_executions: usize,
    /// Fires produced by triggers, skipped ones included.
    pub fires_total: u64,
    pub executions_succeeded: u64,
    /// Resolution and execution failures.
    pub executions_failed: u64,
    pub misfires_skipped: u64,
}
