//! Result consumer

use async_trait::async_trait;
use taskhost::{Task, TaskError, TaskExecutionContext};
use tracing::info;

/// Logs every result message
#[derive(Debug, Default)]
pub struct ResultConsumerTask;

#[async_trait]
impl Task for ResultConsumerTask {
    type Argument = String;
    type Output = ();

    async fn run(&mut self, ctx: &TaskExecutionContext, result: String) -> Result<(), TaskError> {
        info!(processor = ctx.processor_name(), %result, "Operation completed");
        Ok(())
    }
}
