//! Scoped builders producing immutable [`JobDescriptor`]s and [`TriggerSpec`]s.
//!
//! Callers get a `&mut` builder inside a configuration closure; the value is
//! validated and frozen when the closure returns. Setters never fail on the
//! spot: the first validation error is kept and surfaced by `build`.

use std::str::FromStr;
use std::time::Duration;

use cadence_core::{JobKey, TriggerKey};
use chrono::{DateTime, Utc, Weekday};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::types::{
    CalendarRule, ConcurrencyPolicy, CronExpression, JobDescriptor, JobTypeRef, RepeatCount,
    SchedulePolicy, StartCondition, TriggerSpec,
};

/// Mutable description of a job, finalised by [`JobBuilder::build`].
pub struct JobBuilder {
    job_type: JobTypeRef,
    key: Option<JobKey>,
    description: String,
    concurrency: ConcurrencyPolicy,
    job_data: Map<String, Value>,
}

impl JobBuilder {
    pub fn new(job_type: JobTypeRef) -> Self {
        Self {
            job_type,
            key: None,
            description: String::new(),
            concurrency: ConcurrencyPolicy::default(),
            job_data: Map::new(),
        }
    }

    pub fn of<J: Job + 'static>() -> Self {
        Self::new(JobTypeRef::of::<J>())
    }

    /// Run `configure` against a fresh builder and freeze the result.
    pub fn build_with(
        job_type: JobTypeRef,
        configure: impl FnOnce(&mut JobBuilder),
    ) -> Result<JobDescriptor> {
        let mut builder = Self::new(job_type);
        configure(&mut builder);
        builder.build()
    }

    pub fn with_identity(&mut self, name: impl Into<String>) -> &mut Self {
        self.key = Some(JobKey::new(name));
        self
    }

    pub fn with_identity_in_group(
        &mut self,
        name: impl Into<String>,
        group: impl Into<String>,
    ) -> &mut Self {
        self.key = Some(JobKey::with_group(name, group));
        self
    }

    pub fn with_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    pub fn with_concurrency(&mut self, policy: ConcurrencyPolicy) -> &mut Self {
        self.concurrency = policy;
        self
    }

    /// Shorthand for `with_concurrency(ConcurrencyPolicy::NonConcurrent)`.
    pub fn disallow_concurrent_execution(&mut self) -> &mut Self {
        self.with_concurrency(ConcurrencyPolicy::NonConcurrent)
    }

    pub fn using_job_data(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.job_data.insert(key.into(), value.into());
        self
    }

    /// Validate and freeze. Without an explicit identity the job type's
    /// fully qualified name is used.
    pub fn build(self) -> Result<JobDescriptor> {
        let key = self
            .key
            .unwrap_or_else(|| JobKey::new(self.job_type.name()));
        if key.is_blank() {
            return Err(SchedulerError::InvalidDescriptor(
                "job identity must not be empty".to_string(),
            ));
        }
        if key.group.as_deref().is_some_and(|g| g.trim().is_empty()) {
            return Err(SchedulerError::InvalidDescriptor(format!(
                "job '{}' has an empty group",
                key.name
            )));
        }
        Ok(JobDescriptor {
            key,
            job_type: self.job_type,
            description: self.description,
            concurrency: self.concurrency,
            job_data: self.job_data,
        })
    }
}

/// Sub-builder for fixed-interval schedules.
///
/// [`build`](Self::build) validates and returns the policy; it can be called
/// any number of times and yields the same value each time.
#[derive(Debug, Clone, Default)]
pub struct SimpleScheduleBuilder {
    repeat_count: Option<i64>,
    forever: bool,
    interval: Option<Duration>,
}

impl SimpleScheduleBuilder {
    /// Number of repeats after the first fire. Negative values are rejected.
    pub fn with_repeat_count(&mut self, count: i64) -> &mut Self {
        self.repeat_count = Some(count);
        self.forever = false;
        self
    }

    pub fn repeat_forever(&mut self) -> &mut Self {
        self.forever = true;
        self.repeat_count = None;
        self
    }

    pub fn with_interval(&mut self, interval: Duration) -> &mut Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_interval_in_seconds(&mut self, secs: u64) -> &mut Self {
        self.with_interval(Duration::from_secs(secs))
    }

    pub fn with_interval_in_milliseconds(&mut self, millis: u64) -> &mut Self {
        self.with_interval(Duration::from_millis(millis))
    }

    pub fn build(&self) -> Result<SchedulePolicy> {
        let repeat = if self.forever {
            RepeatCount::Forever
        } else {
            let count = self.repeat_count.unwrap_or(0);
            let count = u32::try_from(count).map_err(|_| {
                SchedulerError::InvalidTrigger(format!(
                    "repeat count must be between 0 and {}, got {count}",
                    u32::MAX
                ))
            })?;
            RepeatCount::Times(count)
        };

        let interval = match self.interval {
            Some(interval) if interval.is_zero() => {
                return Err(SchedulerError::InvalidTrigger(
                    "repeat interval must be greater than zero".to_string(),
                ));
            }
            Some(interval) if chrono::Duration::from_std(interval).is_err() => {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "repeat interval {interval:?} is too large"
                )));
            }
            Some(interval) => interval,
            // A single fire never consults the interval.
            None if repeat == RepeatCount::Times(0) => Duration::ZERO,
            None => {
                return Err(SchedulerError::InvalidTrigger(
                    "repeating schedule requires an interval".to_string(),
                ));
            }
        };

        Ok(SchedulePolicy::Simple { repeat, interval })
    }
}

/// Mutable description of a trigger, finalised by [`TriggerBuilder::build`].
#[derive(Debug, Default)]
pub struct TriggerBuilder {
    key: Option<TriggerKey>,
    description: String,
    policy: Option<SchedulePolicy>,
    start: Option<StartCondition>,
    start_conditions_set: u32,
    end_at: Option<DateTime<Utc>>,
    strict_start_conditions: bool,
    error: Option<SchedulerError>,
}

impl TriggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject more than one start condition instead of keeping the last.
    pub fn strict_start_conditions(mut self, strict: bool) -> Self {
        self.strict_start_conditions = strict;
        self
    }

    /// Run `configure` against this builder and freeze the result.
    pub fn build_with(mut self, configure: impl FnOnce(&mut TriggerBuilder)) -> Result<TriggerSpec> {
        configure(&mut self);
        self.build()
    }

    pub fn with_identity(&mut self, name: impl Into<String>) -> &mut Self {
        self.key = Some(TriggerKey::new(name));
        self
    }

    pub fn with_identity_in_group(
        &mut self,
        name: impl Into<String>,
        group: impl Into<String>,
    ) -> &mut Self {
        self.key = Some(TriggerKey::with_group(name, group));
        self
    }

    pub fn with_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    /// Configure a fixed-interval schedule. The closure must hand back the
    /// result of [`SimpleScheduleBuilder::build`].
    pub fn with_simple_schedule(
        &mut self,
        configure: impl FnOnce(&mut SimpleScheduleBuilder) -> Result<SchedulePolicy>,
    ) -> &mut Self {
        let mut schedule = SimpleScheduleBuilder::default();
        match configure(&mut schedule) {
            Ok(policy) => self.policy = Some(policy),
            Err(e) => self.record(e),
        }
        self
    }

    /// Seconds-resolution cron expression (6 or 7 fields).
    pub fn with_cron_schedule(&mut self, expression: impl Into<String>) -> &mut Self {
        let source = expression.into();
        match cron::Schedule::from_str(&source) {
            Ok(schedule) => {
                self.policy = Some(SchedulePolicy::Cron(CronExpression::new(source, schedule)))
            }
            Err(e) => self.record(SchedulerError::InvalidTrigger(format!(
                "bad cron expression '{source}': {e}"
            ))),
        }
        self
    }

    /// Every day at `hour:minute` UTC.
    pub fn with_daily_schedule(&mut self, hour: u8, minute: u8) -> &mut Self {
        if let Err(e) = check_time_of_day(hour, minute) {
            self.record(e);
            return self;
        }
        self.policy = Some(SchedulePolicy::Calendar(CalendarRule::Daily { hour, minute }));
        self
    }

    /// Every `weekday` at `hour:minute` UTC.
    pub fn with_weekly_schedule(&mut self, weekday: Weekday, hour: u8, minute: u8) -> &mut Self {
        if let Err(e) = check_time_of_day(hour, minute) {
            self.record(e);
            return self;
        }
        self.policy = Some(SchedulePolicy::Calendar(CalendarRule::Weekly {
            weekday: weekday.num_days_from_monday() as u8,
            hour,
            minute,
        }));
        self
    }

    pub fn start_now(&mut self) -> &mut Self {
        self.set_start(StartCondition::Immediate)
    }

    pub fn start_at(&mut self, at: DateTime<Utc>) -> &mut Self {
        self.set_start(StartCondition::At(at))
    }

    /// Start `delay` after the trigger is registered.
    pub fn start_after(&mut self, delay: Duration) -> &mut Self {
        self.set_start(StartCondition::AfterDelay(delay))
    }

    pub fn end_at(&mut self, at: DateTime<Utc>) -> &mut Self {
        self.end_at = Some(at);
        self
    }

    /// Validate and freeze. Without an explicit identity a random one is
    /// generated; without a start condition the trigger starts immediately.
    pub fn build(self) -> Result<TriggerSpec> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let key = self
            .key
            .unwrap_or_else(|| TriggerKey::new(Uuid::new_v4().to_string()));
        if key.is_blank() {
            return Err(SchedulerError::InvalidTrigger(
                "trigger identity must not be empty".to_string(),
            ));
        }
        let policy = self.policy.ok_or_else(|| {
            SchedulerError::InvalidTrigger(format!("trigger '{key}' has no schedule"))
        })?;
        let start = self.start.unwrap_or_default();
        if let (StartCondition::At(start_at), Some(end_at)) = (start, self.end_at) {
            if end_at <= start_at {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "trigger '{key}' ends before it starts"
                )));
            }
        }
        Ok(TriggerSpec {
            key,
            description: self.description,
            policy,
            start,
            end_at: self.end_at,
        })
    }

    fn set_start(&mut self, start: StartCondition) -> &mut Self {
        self.start_conditions_set += 1;
        if self.start_conditions_set > 1 {
            if self.strict_start_conditions {
                self.record(SchedulerError::InvalidTrigger(
                    "more than one start condition configured".to_string(),
                ));
                return self;
            }
            debug!(previous = ?self.start, new = ?start, "start condition overwritten");
        }
        self.start = Some(start);
        self
    }

    /// Keep only the first error so the caller sees the root cause.
    fn record(&mut self, error: SchedulerError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

fn check_time_of_day(hour: u8, minute: u8) -> Result<()> {
    if hour > 23 || minute > 59 {
        return Err(SchedulerError::InvalidTrigger(format!(
            "invalid time of day {hour:02}:{minute:02}"
        )));
    }
    Ok(())
}
