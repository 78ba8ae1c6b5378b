//! Poison message source

use std::time::Duration;

use async_trait::async_trait;
use taskhost::{Task, TaskError, TaskExecutionContext};

use crate::REQUEST_QUEUE;

/// Body that never converts into an operation
pub const POISON_BODY: &str = "blablabla...";

/// Operation whose evaluation fails inside the task
pub const DIVIDE_BY_ZERO_BODY: &str = "1 / 0";

/// Puts one unconvertible and one failing operation per tick
#[derive(Debug, Default)]
pub struct PoisoningTask;

#[async_trait]
impl Task for PoisoningTask {
    type Argument = ();
    type Output = ();

    async fn run(&mut self, ctx: &TaskExecutionContext, _: ()) -> Result<(), TaskError> {
        let target = ctx.get_property("TargetQueue", REQUEST_QUEUE.to_string());
        let queue = ctx.queue(&target)?;
        queue.put_message(POISON_BODY, Duration::ZERO).await?;
        queue.put_message(DIVIDE_BY_ZERO_BODY, Duration::ZERO).await?;
        Ok(())
    }
}
