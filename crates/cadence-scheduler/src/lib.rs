//! `cadence-scheduler` — in-process, Tokio-based job scheduling.
//!
//! # Overview
//!
//! Application code describes *what* to run with a [`JobBuilder`] and *when*
//! with a [`TriggerBuilder`], then registers both through the
//! [`ScheduleJobManager`]. The [`SchedulerEngine`] keeps every registration in
//! memory, sleeps until the earliest pending fire time and runs each firing on
//! its own task. Job instances come from a [`JobFactory`] per firing; outcomes
//! go to an [`ExecutionObserver`].
//!
//! # Schedule policies
//!
//! | Policy     | Behaviour                                              |
//! |------------|--------------------------------------------------------|
//! | `Simple`   | Fixed interval, repeated N extra times or forever      |
//! | `Cron`     | Seconds-resolution cron expression, UTC               |
//! | `Calendar` | Daily or weekly at HH:MM UTC                           |
//!
//! Nothing is persisted: registrations live exactly as long as the engine.

pub mod builder;
pub mod engine;
pub mod error;
pub mod factory;
pub mod job;
pub mod manager;
pub mod observer;
mod registry;
pub mod schedule;
pub mod types;

pub use builder::{JobBuilder, SimpleScheduleBuilder, TriggerBuilder};
pub use cadence_core::{JobKey, TriggerKey};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use factory::{JobFactory, JobRegistry};
pub use job::{Job, JobResult};
pub use manager::ScheduleJobManager;
pub use observer::{ExecutionObserver, TracingObserver};
pub use types::{
    CalendarRule, ConcurrencyPolicy, EngineState, JobDescriptor, JobExecutionContext, JobTypeRef,
    RepeatCount, SchedulePolicy, SchedulerStatus, StartCondition, TriggerSpec,
};
