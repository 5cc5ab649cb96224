// Shared jobs, observer and manager setup for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::SchedulerConfig;
use cadence_scheduler::{
    ExecutionObserver, Job, JobExecutionContext, JobKey, JobRegistry, JobResult,
    ScheduleJobManager, SchedulerError, TriggerBuilder, TriggerKey,
};

pub struct HelloJob {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for HelloJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct GoodbyeJob {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for GoodbyeJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks how many instances overlap.
#[derive(Clone, Default)]
pub struct Overlap {
    pub current: Arc<AtomicUsize>,
    pub max: Arc<AtomicUsize>,
    pub finished: Arc<AtomicUsize>,
}

pub struct SlowJob {
    pub overlap: Overlap,
    pub delay: Duration,
}

#[async_trait]
impl Job for SlowJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        let now = self.overlap.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.overlap.max.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.overlap.current.fetch_sub(1, Ordering::SeqCst);
        self.overlap.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FailingJob {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for FailingJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("upstream unavailable")
    }
}

pub struct PanickingJob {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for PanickingJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        panic!("job blew up");
    }
}

/// Never registered with the factory.
pub struct UnresolvableJob;

#[async_trait]
impl Job for UnresolvableJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> JobResult {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub job: JobKey,
    pub code: &'static str,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingObserver {
    pub failures: Mutex<Vec<Failure>>,
    pub skips: Mutex<Vec<(JobKey, TriggerKey)>>,
    pub successes: AtomicUsize,
}

impl RecordingObserver {
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().unwrap().clone()
    }

    pub fn skip_count(&self) -> usize {
        self.skips.lock().unwrap().len()
    }
}

impl ExecutionObserver for RecordingObserver {
    fn report_execution_failure(&self, job: &JobKey, error: &SchedulerError) {
        self.failures.lock().unwrap().push(Failure {
            job: job.clone(),
            code: error.code(),
            message: error.to_string(),
        });
    }

    fn report_misfire_skip(&self, job: &JobKey, trigger: &TriggerKey) {
        self.skips.lock().unwrap().push((job.clone(), trigger.clone()));
    }

    fn report_execution_success(&self, _job: &JobKey, _elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        instance_name: "test".to_string(),
        idle_wait_ms: 200,
        ..SchedulerConfig::default()
    }
}

pub async fn manager_with(
    config: SchedulerConfig,
    jobs: JobRegistry,
) -> (ScheduleJobManager, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let manager = ScheduleJobManager::from_config(&config, Arc::new(jobs), observer.clone())
        .await
        .unwrap();
    (manager, observer)
}

pub fn counting_registry(hello: &Arc<AtomicUsize>, goodbye: &Arc<AtomicUsize>) -> JobRegistry {
    let mut jobs = JobRegistry::new();
    let hello = hello.clone();
    let goodbye = goodbye.clone();
    jobs.register::<HelloJob, _>(move || Ok(HelloJob { runs: hello.clone() }));
    jobs.register::<GoodbyeJob, _>(move || {
        Ok(GoodbyeJob {
            runs: goodbye.clone(),
        })
    });
    jobs
}

/// Fire now, then every `millis`, `repeat` more times.
pub fn every_millis(millis: u64, repeat: i64) -> impl FnOnce(&mut TriggerBuilder) {
    move |t: &mut TriggerBuilder| {
        t.start_now().with_simple_schedule(|s| {
            s.with_interval_in_milliseconds(millis)
                .with_repeat_count(repeat)
                .build()
        });
    }
}

/// Fire now, then every `millis` until unscheduled.
pub fn forever_every_millis(millis: u64) -> impl FnOnce(&mut TriggerBuilder) {
    move |t: &mut TriggerBuilder| {
        t.start_now().with_simple_schedule(|s| {
            s.with_interval_in_milliseconds(millis)
                .repeat_forever()
                .build()
        });
    }
}

pub fn load(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
