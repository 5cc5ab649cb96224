use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::types::JobTypeRef;

/// Produces a ready-to-run job instance for a firing.
///
/// Called once per firing, never cached, so per-execution dependencies are
/// fresh every time. A failure abandons that firing only; the schedule
/// carries on.
pub trait JobFactory: Send + Sync {
    fn create(&self, job_type: &JobTypeRef) -> Result<Box<dyn Job>>;
}

type Constructor = Arc<dyn Fn() -> anyhow::Result<Box<dyn Job>> + Send + Sync>;

/// [`JobFactory`] backed by a table of constructor closures keyed by job type.
///
/// Closures capture whatever shared dependencies the job needs (an
/// `Arc<...>` per singleton), which keeps dependency lifetimes explicit.
#[derive(Default, Clone)]
pub struct JobRegistry {
    constructors: HashMap<TypeId, Constructor>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the constructor for `J`, replacing any previous one.
    pub fn register<J, F>(&mut self, constructor: F) -> &mut Self
    where
        J: Job + 'static,
        F: Fn() -> anyhow::Result<J> + Send + Sync + 'static,
    {
        let job_type = JobTypeRef::of::<J>();
        debug!(%job_type, "job constructor registered");
        self.constructors.insert(
            job_type.type_id(),
            Arc::new(move || Ok(Box::new(constructor()?) as Box<dyn Job>)),
        );
        self
    }

    /// Register `J` using its `Default` impl.
    pub fn register_default<J>(&mut self) -> &mut Self
    where
        J: Job + Default + 'static,
    {
        self.register::<J, _>(|| Ok(J::default()))
    }

    pub fn contains(&self, job_type: &JobTypeRef) -> bool {
        self.constructors.contains_key(&job_type.type_id())
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl JobFactory for JobRegistry {
    fn create(&self, job_type: &JobTypeRef) -> Result<Box<dyn Job>> {
        let constructor = self.constructors.get(&job_type.type_id()).ok_or_else(|| {
            SchedulerError::ResolutionFailure {
                job_type: job_type.name().to_string(),
                reason: "no constructor registered".to_string(),
            }
        })?;
        constructor().map_err(|e| SchedulerError::ResolutionFailure {
            job_type: job_type.name().to_string(),
            reason: format!("{e:#}"),
        })
    }
}
