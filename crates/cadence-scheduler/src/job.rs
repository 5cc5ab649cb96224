use async_trait::async_trait;

use crate::types::JobExecutionContext;

/// Outcome of one job execution. Errors are reported, never propagated to
/// the dispatch loop.
pub type JobResult = anyhow::Result<()>;

/// The execution contract every scheduled job implements.
///
/// A fresh instance is obtained from the [`JobFactory`](crate::factory::JobFactory)
/// for every firing and dropped once `execute` returns.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobExecutionContext) -> JobResult;
}
