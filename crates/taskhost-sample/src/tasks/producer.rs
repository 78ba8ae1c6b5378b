//! Random operation producer

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use taskhost::{Task, TaskError, TaskExecutionContext};
use tracing::debug;

use super::binary_operation::{BinaryOperationMessage, OPERATORS};
use crate::REQUEST_QUEUE;

const BATCH_SIZE_PROPERTY: &str = "BatchSize";
const TARGET_QUEUE_PROPERTY: &str = "TargetQueue";
const DEFAULT_BATCH_SIZE: u32 = 100;

/// Puts `BatchSize` random operations on the request queue per tick
#[derive(Debug)]
pub struct BinaryOperationProducerTask {
    batch_size: u32,
    target_queue: String,
}

impl Default for BinaryOperationProducerTask {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            target_queue: REQUEST_QUEUE.to_string(),
        }
    }
}

/// Build `count` random operations with operands in `0..1000`
pub fn random_operations(count: u32) -> Vec<BinaryOperationMessage> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let operator = OPERATORS[rng.gen_range(0..OPERATORS.len())];
            BinaryOperationMessage::new(rng.gen_range(0..1000), operator, rng.gen_range(0..1000))
        })
        .collect()
}

#[async_trait]
impl Task for BinaryOperationProducerTask {
    type Argument = ();
    type Output = ();

    fn setup(&mut self, ctx: &TaskExecutionContext) -> Result<(), TaskError> {
        self.batch_size = ctx.get_property(BATCH_SIZE_PROPERTY, DEFAULT_BATCH_SIZE);
        self.target_queue = ctx.get_property(TARGET_QUEUE_PROPERTY, REQUEST_QUEUE.to_string());
        Ok(())
    }

    async fn run(&mut self, ctx: &TaskExecutionContext, _: ()) -> Result<(), TaskError> {
        let queue = ctx.queue(&self.target_queue)?;
        for operation in random_operations(self.batch_size) {
            queue.put_message(&operation.to_string(), Duration::ZERO).await?;
        }
        debug!(count = self.batch_size, queue = %self.target_queue, "Produced operations");
        Ok(())
    }
}
