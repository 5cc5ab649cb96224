use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

pub const DEFAULT_INSTANCE_NAME: &str = "cadence";
pub const DEFAULT_IDLE_WAIT_MS: u64 = 30_000; // re-evaluate fire times at least this often

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Jobs declared in the config file. Only the CLI consumes these.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Scheduler engine and manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Used as the `scheduler` field on every log line the engine emits.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// Start the engine as soon as the manager is built.
    #[serde(default = "bool_true")]
    pub auto_start: bool,
    /// Default for manager-level shutdown: block until in-flight jobs finish.
    #[serde(default = "bool_true")]
    pub wait_for_jobs_on_shutdown: bool,
    /// Longest the dispatch loop sleeps before re-checking the registry.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// Reject triggers that configure more than one start condition instead of
    /// letting the last one win.
    #[serde(default)]
    pub strict_start_conditions: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            auto_start: true,
            wait_for_jobs_on_shutdown: true,
            idle_wait_ms: DEFAULT_IDLE_WAIT_MS,
            strict_start_conditions: false,
        }
    }
}

/// A job declared in the config file.
///
/// Exactly one of `interval_secs` or `cron` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub group: Option<String>,
    pub description: Option<String>,
    /// Text the job logs on every run.
    #[serde(default)]
    pub message: String,
    /// Allow overlapping runs of this job.
    #[serde(default)]
    pub concurrent: bool,
    pub interval_secs: Option<u64>,
    /// Number of repeats after the first run. Absent means repeat forever.
    pub repeat_count: Option<u32>,
    /// Seconds-resolution cron expression (6 or 7 fields).
    pub cron: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_instance_name() -> String {
    DEFAULT_INSTANCE_NAME.to_string()
}
fn default_idle_wait_ms() -> u64 {
    DEFAULT_IDLE_WAIT_MS
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_SCHEDULER__IDLE_WAIT_MS=500`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("CADENCE_").split("__")),
        )
    }

    /// Extract and validate config from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: CadenceConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.idle_wait_ms == 0 {
            return Err(CoreError::Config(
                "scheduler.idle_wait_ms must be greater than zero".to_string(),
            ));
        }
        for job in &self.jobs {
            match (job.interval_secs, job.cron.as_deref()) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(CoreError::Config(format!(
                        "job '{}' must set exactly one of interval_secs or cron",
                        job.name
                    )));
                }
                (Some(0), None) => {
                    return Err(CoreError::Config(format!(
                        "job '{}' has a zero interval",
                        job.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
