use async_trait::async_trait;
use cadence_core::JobConfig;
use cadence_scheduler::{
    Job, JobExecutionContext, JobKey, JobResult, Result, ScheduleJobManager,
};
use serde_json::Value;
use tracing::info;

/// The job every config entry runs: logs its configured message.
#[derive(Default)]
pub struct LogJob;

#[async_trait]
impl Job for LogJob {
    async fn execute(&self, ctx: &JobExecutionContext) -> JobResult {
        let message = ctx
            .job_data()
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        info!(
            job = %ctx.job_key,
            fire_count = ctx.fire_count,
            scheduled = %ctx.scheduled_fire_time,
            "{message}"
        );
        Ok(())
    }
}

/// Register one `[[jobs]]` entry as a [`LogJob`].
pub async fn schedule_configured(manager: &ScheduleJobManager, job: &JobConfig) -> Result<JobKey> {
    manager
        .schedule::<LogJob>(
            |b| {
                match &job.group {
                    Some(group) => b.with_identity_in_group(&job.name, group),
                    None => b.with_identity(&job.name),
                };
                if let Some(description) = &job.description {
                    b.with_description(description);
                }
                if !job.concurrent {
                    b.disallow_concurrent_execution();
                }
                b.using_job_data("message", job.message.clone());
            },
            |t| match (job.interval_secs, job.cron.as_deref()) {
                (Some(secs), _) => {
                    t.start_now().with_simple_schedule(|s| {
                        s.with_interval_in_seconds(secs);
                        match job.repeat_count {
                            Some(n) => s.with_repeat_count(i64::from(n)),
                            None => s.repeat_forever(),
                        };
                        s.build()
                    });
                }
                (None, Some(expression)) => {
                    t.with_cron_schedule(expression);
                }
                // Left without a schedule; the trigger build rejects it.
                (None, None) => {}
            },
        )
        .await
}
