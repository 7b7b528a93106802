use crate::Result;

/// One kind of task the scheduler runs in batches.
///
/// `execute` is called concurrently from the worker pool, once per input of
/// a batch. A failed task is reported on its own and never cancels the
/// other tasks of the batch.
pub trait PipelineStage: Send + Sync {
    type Input: Send;
    type Output: Send;

    /// Execute this stage for one input
    fn execute(&self, input: Self::Input) -> Result<Self::Output>;

    /// Get the name of this stage for logging
    fn stage_name(&self) -> &str;
}
