//! Calculator sample for the background task host
//!
//! Wires four task types onto two queues:
//!
//! ```text
//! Producer ──┐                                  ┌──▶ Consumer
//!            ├──▶ requestQueue ──▶ Processor ──▶ responseQueue
//! Poisoner ──┘
//! ```

pub mod settings;
pub mod tasks;

use taskhost::task::{DisplayConverter, FromStrConverter, NoResult, StringConverter};
use taskhost::TaskRegistry;

use tasks::{
    BinaryOperationProcessorTask, BinaryOperationProducerTask, PoisoningTask, ResultConsumerTask,
};

pub use settings::{default_settings, load_settings, SampleConfig};

/// Queue carrying operations to evaluate
pub const REQUEST_QUEUE: &str = "requestQueue";

/// Queue carrying evaluated results
pub const RESPONSE_QUEUE: &str = "responseQueue";

/// Registered task type names
pub mod task_types {
    pub const PRODUCER: &str = "BinaryOperationProducer";
    pub const POISONER: &str = "Poisoning";
    pub const PROCESSOR: &str = "BinaryOperationProcessor";
    pub const CONSUMER: &str = "ResultConsumer";
}

/// Register every calculator task type
pub fn register_sample_tasks(registry: &mut TaskRegistry) -> &mut TaskRegistry {
    registry
        .register_trigger_task(task_types::PRODUCER, BinaryOperationProducerTask::default)
        .register_trigger_task(task_types::POISONER, PoisoningTask::default)
        .register_queue_task(
            task_types::PROCESSOR,
            BinaryOperationProcessorTask::default,
            FromStrConverter,
            DisplayConverter,
        )
        .register_queue_task(
            task_types::CONSUMER,
            ResultConsumerTask::default,
            StringConverter,
            NoResult,
        )
}

/// Registry with every calculator task type
pub fn sample_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register_sample_tasks(&mut registry);
    registry
}
