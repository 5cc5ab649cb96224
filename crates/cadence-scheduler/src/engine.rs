use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::{JobKey, SchedulerConfig, TriggerKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::{
    error::{Result, SchedulerError},
    factory::JobFactory,
    observer::ExecutionObserver,
    registry::{Firing, Registry},
    types::{
        ConcurrencyPolicy, EngineState, JobDescriptor, JobExecutionContext, SchedulerStatus,
        TriggerSpec,
    },
};

/// Owns the registered jobs and drives the dispatch loop.
///
/// Cheap to clone; every clone drives the same engine. Fire-time evaluation
/// runs on one background task, executions run on their own tasks so a slow
/// job never holds up other triggers.
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    name: String,
    idle_wait: Duration,
    /// The single shared mutable resource. State transitions also happen under
    /// this lock so registration and shutdown are ordered.
    registry: Mutex<Registry>,
    state: watch::Sender<EngineState>,
    /// Poked whenever the registry changes so the loop re-reads its deadline.
    wake: Notify,
    /// In-flight executions per job identity.
    running: DashMap<JobKey, usize>,
    executions: TaskTracker,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    factory: Arc<dyn JobFactory>,
    observer: Arc<dyn ExecutionObserver>,
    metrics: Metrics,
}

#[derive(Default)]
struct Metrics {
    fires: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl SchedulerEngine {
    /// Build an engine in [`EngineState::Standby`]. Nothing fires until
    /// [`start`](Self::start) is called.
    pub fn new(
        config: &SchedulerConfig,
        factory: Arc<dyn JobFactory>,
        observer: Arc<dyn ExecutionObserver>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Standby);
        Self {
            inner: Arc::new(EngineInner {
                name: config.instance_name.clone(),
                idle_wait: Duration::from_millis(config.idle_wait_ms),
                registry: Mutex::new(Registry::default()),
                state,
                wake: Notify::new(),
                running: DashMap::new(),
                executions: TaskTracker::new(),
                dispatcher: Mutex::new(None),
                factory,
                observer,
                metrics: Metrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Insert or replace the registration for `descriptor.key`.
    ///
    /// On a started engine the triggers are live as soon as this returns. An
    /// execution already in flight under a replaced registration finishes with
    /// the old descriptor.
    pub async fn register(
        &self,
        descriptor: JobDescriptor,
        triggers: Vec<TriggerSpec>,
    ) -> Result<()> {
        let key = descriptor.key.clone();
        let trigger_count = triggers.len();
        let replaced = {
            let mut registry = self.inner.registry.lock().await;
            if self.state() == EngineState::ShutDown {
                return Err(SchedulerError::EngineStopped);
            }
            registry.insert(descriptor, triggers, Utc::now())?
        };
        self.inner.wake.notify_one();

        if replaced {
            info!(scheduler = %self.inner.name, job = %key, triggers = trigger_count, "job registration replaced");
        } else {
            info!(scheduler = %self.inner.name, job = %key, triggers = trigger_count, "job registered");
        }
        Ok(())
    }

    /// Begin (or resume) evaluating triggers. Idempotent.
    ///
    /// Must be called from within a Tokio runtime; the dispatch loop is
    /// spawned on the current one.
    pub async fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Runtime(e.to_string()))?;

        let _registry = self.inner.registry.lock().await;
        match self.state() {
            EngineState::ShutDown => return Err(SchedulerError::EngineStopped),
            EngineState::Started => return Ok(()),
            EngineState::Standby => {}
        }
        self.inner.state.send_replace(EngineState::Started);

        let mut dispatcher = self.inner.dispatcher.lock().await;
        if dispatcher.is_none() {
            *dispatcher = Some(runtime.spawn(dispatch_loop(self.inner.clone())));
        }
        info!(scheduler = %self.inner.name, "scheduler started");
        Ok(())
    }

    /// Stop firing without discarding anything. `start` resumes.
    pub async fn standby(&self) -> Result<()> {
        let _registry = self.inner.registry.lock().await;
        match self.state() {
            EngineState::ShutDown => Err(SchedulerError::EngineStopped),
            EngineState::Standby => Ok(()),
            EngineState::Started => {
                self.inner.state.send_replace(EngineState::Standby);
                info!(scheduler = %self.inner.name, "scheduler in standby");
                Ok(())
            }
        }
    }

    /// Stop all future fires. Terminal.
    ///
    /// With `wait_for_jobs` this returns once every in-flight execution has
    /// finished; otherwise it returns immediately and running jobs complete on
    /// their own. Registrations survive, so `check_exists` keeps answering.
    pub async fn shutdown(&self, wait_for_jobs: bool) {
        {
            let _registry = self.inner.registry.lock().await;
            if self.state() == EngineState::ShutDown {
                return;
            }
            self.inner.state.send_replace(EngineState::ShutDown);
        }
        self.inner.executions.close();
        info!(
            scheduler = %self.inner.name,
            wait_for_jobs,
            in_flight = self.inner.executions.len(),
            "scheduler shutting down"
        );

        if wait_for_jobs {
            // The loop may be mid-dispatch; let it finish spawning first.
            let dispatcher = self.inner.dispatcher.lock().await.take();
            if let Some(handle) = dispatcher {
                let _ = handle.await;
            }
            self.inner.executions.wait().await;
        }
        info!(scheduler = %self.inner.name, "scheduler shut down");
    }

    /// True while a registration exists for `key`, whatever its run state.
    pub async fn check_exists(&self, key: &JobKey) -> bool {
        self.inner.registry.lock().await.contains(key)
    }

    /// Remove a job and all its triggers. Allowed after shutdown.
    pub async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        let removed = self.inner.registry.lock().await.remove_job(key);
        if removed {
            self.inner.wake.notify_one();
            info!(scheduler = %self.inner.name, job = %key, "job deleted");
        }
        Ok(removed)
    }

    /// Remove one trigger; a job left with no triggers is deleted. Allowed
    /// after shutdown.
    pub async fn unschedule_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let job = self.inner.registry.lock().await.remove_trigger(key);
        let Some(job) = job else {
            return Ok(false);
        };
        self.inner.wake.notify_one();
        info!(scheduler = %self.inner.name, job = %job, trigger = %key, "trigger unscheduled");
        Ok(true)
    }

    /// Replace the trigger registered as `key`. Returns `false` when no such
    /// trigger exists.
    pub async fn reschedule_trigger(&self, key: &TriggerKey, spec: TriggerSpec) -> Result<bool> {
        let new_key = spec.key.clone();
        let job = {
            let mut registry = self.inner.registry.lock().await;
            if self.state() == EngineState::ShutDown {
                return Err(SchedulerError::EngineStopped);
            }
            registry.replace_trigger(key, spec, Utc::now())?
        };
        let Some(job) = job else {
            return Ok(false);
        };
        self.inner.wake.notify_one();
        info!(scheduler = %self.inner.name, job = %job, trigger = %new_key, replaced = %key, "trigger rescheduled");
        Ok(true)
    }

    /// Registered job identities, sorted.
    pub async fn job_keys(&self) -> Vec<JobKey> {
        self.inner.registry.lock().await.job_keys()
    }

    pub async fn trigger_keys(&self, key: &JobKey) -> Vec<TriggerKey> {
        self.inner.registry.lock().await.trigger_keys(key)
    }

    pub async fn descriptor(&self, key: &JobKey) -> Option<Arc<JobDescriptor>> {
        self.inner.registry.lock().await.descriptor(key)
    }

    /// Earliest pending fire of the job, `None` when dormant or unknown.
    pub async fn next_fire_time(&self, key: &JobKey) -> Option<DateTime<Utc>> {
        self.inner.registry.lock().await.next_fire_time(key)
    }

    /// True while at least one instance of `key` is executing.
    pub fn is_running(&self, key: &JobKey) -> bool {
        self.inner.is_running(key)
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.state() == EngineState::Started
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() == EngineState::ShutDown
    }

    pub async fn status(&self) -> SchedulerStatus {
        let job_count = self.inner.registry.lock().await.len();
        let metrics = &self.inner.metrics;
        SchedulerStatus {
            instance_name: self.inner.name.clone(),
            state: self.state(),
            job_count,
            running_executions: self.inner.running.iter().map(|e| *e.value()).sum(),
            fires_total: metrics.fires.load(Ordering::Relaxed),
            executions_succeeded: metrics.succeeded.load(Ordering::Relaxed),
            executions_failed: metrics.failed.load(Ordering::Relaxed),
            misfires_skipped: metrics.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Sleep until the earliest fire (capped by the idle wait), dispatch what is
/// due, repeat. Exits on shutdown.
async fn dispatch_loop(inner: Arc<EngineInner>) {
    let mut state = inner.state.subscribe();
    info!(scheduler = %inner.name, "dispatch loop started");

    loop {
        let current = *state.borrow_and_update();
        match current {
            EngineState::ShutDown => break,
            EngineState::Standby => {
                if state.changed().await.is_err() {
                    break;
                }
                continue;
            }
            EngineState::Started => {}
        }

        let wait = inner.next_wait().await;
        tokio::select! {
            biased;
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(wait) => inner.dispatch_due().await,
        }
    }

    info!(scheduler = %inner.name, "dispatch loop stopped");
}

impl EngineInner {
    async fn next_wait(&self) -> Duration {
        let next = self.registry.lock().await.next_due();
        match next {
            Some(at) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.idle_wait),
            None => self.idle_wait,
        }
    }

    async fn dispatch_due(self: &Arc<Self>) {
        let due = {
            let mut registry = self.registry.lock().await;
            if *self.state.borrow() != EngineState::Started {
                return;
            }
            registry.take_due(Utc::now())
        };
        for firing in due {
            self.dispatch(firing);
        }
    }

    /// Only the dispatch loop calls this, so the running check and the
    /// acquire below cannot race with another dispatch.
    fn dispatch(self: &Arc<Self>, firing: Firing) {
        let key = firing.descriptor.key.clone();
        self.metrics.fires.fetch_add(1, Ordering::Relaxed);

        if firing.descriptor.concurrency == ConcurrencyPolicy::NonConcurrent && self.is_running(&key) {
            self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
            self.observer.report_misfire_skip(&key, &firing.trigger.key);
            return;
        }

        debug!(
            scheduler = %self.name,
            job = %key,
            trigger = %firing.trigger.key,
            fire_count = firing.fire_count,
            "firing job"
        );
        let guard = RunningGuard::acquire(self, key);
        let inner = self.clone();
        self.executions.spawn(async move {
            let _guard = guard;
            inner.execute(firing).await;
        });
    }

    async fn execute(&self, firing: Firing) {
        let key = &firing.descriptor.key;
        let job = match self.factory.create(&firing.descriptor.job_type) {
            Ok(job) => job,
            Err(e) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                self.observer.report_execution_failure(key, &e);
                return;
            }
        };

        let ctx = JobExecutionContext {
            job_key: key.clone(),
            trigger_key: firing.trigger.key.clone(),
            scheduled_fire_time: firing.scheduled,
            fire_time: Utc::now(),
            fire_count: firing.fire_count,
            descriptor: firing.descriptor.clone(),
        };
        let started = Instant::now();
        let outcome = AssertUnwindSafe(job.execute(&ctx)).catch_unwind().await;

        let reason = match outcome {
            Ok(Ok(())) => {
                self.metrics.succeeded.fetch_add(1, Ordering::Relaxed);
                self.observer.report_execution_success(key, started.elapsed());
                return;
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => format!("job panicked: {}", panic_message(panic.as_ref())),
        };
        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
        self.observer.report_execution_failure(
            key,
            &SchedulerError::ExecutionFailure {
                job: key.to_string(),
                reason,
            },
        );
    }

    fn is_running(&self, key: &JobKey) -> bool {
        self.running.get(key).is_some_and(|count| *count > 0)
    }
}

/// Marks one execution of a job identity as in flight; released on drop, so
/// a panicking job cannot leave its identity stuck in the running state.
struct RunningGuard {
    inner: Arc<EngineInner>,
    key: JobKey,
}

impl RunningGuard {
    fn acquire(inner: &Arc<EngineInner>, key: JobKey) -> Self {
        *inner.running.entry(key.clone()).or_insert(0) += 1;
        Self {
            inner: inner.clone(),
            key,
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.inner.running.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        self.inner.running.remove_if(&self.key, |_, count| *count == 0);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
