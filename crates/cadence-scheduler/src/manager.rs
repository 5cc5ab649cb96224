use std::sync::Arc;

use cadence_core::{JobKey, SchedulerConfig, TriggerKey};

use crate::{
    builder::{JobBuilder, TriggerBuilder},
    engine::SchedulerEngine,
    error::Result,
    factory::JobFactory,
    job::Job,
    observer::ExecutionObserver,
    types::{JobDescriptor, JobTypeRef, TriggerSpec},
};

/// Application-facing entry point: build a job and its trigger from two
/// configuration closures and hand them to the engine.
///
/// Both closures run synchronously and completely before anything is
/// registered, so an invalid definition never reaches the engine.
pub struct ScheduleJobManager {
    engine: SchedulerEngine,
    config: SchedulerConfig,
}

impl ScheduleJobManager {
    /// Build an engine from `config`, starting it when `auto_start` is set.
    pub async fn from_config(
        config: &SchedulerConfig,
        factory: Arc<dyn JobFactory>,
        observer: Arc<dyn ExecutionObserver>,
    ) -> Result<Self> {
        let engine = SchedulerEngine::new(config, factory, observer);
        if config.auto_start {
            engine.start().await?;
        }
        Ok(Self::new(engine, config.clone()))
    }

    /// Wrap an existing engine. Its run state is left as is.
    pub fn new(engine: SchedulerEngine, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    pub fn scheduler(&self) -> &SchedulerEngine {
        &self.engine
    }

    /// A trigger builder carrying this manager's start-condition policy.
    pub fn trigger_builder(&self) -> TriggerBuilder {
        TriggerBuilder::new().strict_start_conditions(self.config.strict_start_conditions)
    }

    /// Register job type `J` with one trigger. Replaces any registration under
    /// the same job identity. Returns the identity used.
    pub async fn schedule<J: Job + 'static>(
        &self,
        configure_job: impl FnOnce(&mut JobBuilder),
        configure_trigger: impl FnOnce(&mut TriggerBuilder),
    ) -> Result<JobKey> {
        let descriptor = JobBuilder::build_with(JobTypeRef::of::<J>(), configure_job)?;
        let trigger = self.trigger_builder().build_with(configure_trigger)?;
        let key = descriptor.key.clone();
        self.engine.register(descriptor, vec![trigger]).await?;
        Ok(key)
    }

    /// Register a prebuilt descriptor with any number of triggers.
    pub async fn schedule_descriptor(
        &self,
        descriptor: JobDescriptor,
        triggers: Vec<TriggerSpec>,
    ) -> Result<JobKey> {
        let key = descriptor.key.clone();
        self.engine.register(descriptor, triggers).await?;
        Ok(key)
    }

    /// Replace the trigger registered as `trigger_key` with a freshly built one.
    pub async fn reschedule(
        &self,
        trigger_key: &TriggerKey,
        configure_trigger: impl FnOnce(&mut TriggerBuilder),
    ) -> Result<bool> {
        let trigger = self.trigger_builder().build_with(configure_trigger)?;
        self.engine.reschedule_trigger(trigger_key, trigger).await
    }

    pub async fn unschedule(&self, trigger_key: &TriggerKey) -> Result<bool> {
        self.engine.unschedule_trigger(trigger_key).await
    }

    pub async fn delete(&self, job_key: &JobKey) -> Result<bool> {
        self.engine.delete_job(job_key).await
    }

    pub async fn start(&self) -> Result<()> {
        self.engine.start().await
    }

    /// Shut down, waiting for running jobs per `wait_for_jobs_on_shutdown`.
    pub async fn shutdown(&self) {
        self.engine.shutdown(self.config.wait_for_jobs_on_shutdown).await
    }

    /// Shut down, overriding the configured wait behaviour.
    pub async fn shutdown_with(&self, wait_for_jobs: bool) {
        self.engine.shutdown(wait_for_jobs).await
    }
}
