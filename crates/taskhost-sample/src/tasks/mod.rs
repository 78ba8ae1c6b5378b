//! Calculator tasks
//!
//! Producer and poisoning tasks feed the request queue, the processor turns
//! operations into results on the response queue, and the consumer logs
//! them.

mod binary_operation;
mod consumer;
mod poisoning;
mod producer;

pub use binary_operation::{
    evaluate, BinaryOperationMessage, BinaryOperationProcessorTask, BinaryOperationResultMessage,
    ParseOperationError, OPERATORS,
};
pub use consumer::ResultConsumerTask;
pub use poisoning::{PoisoningTask, DIVIDE_BY_ZERO_BODY, POISON_BODY};
pub use producer::{random_operations, BinaryOperationProducerTask};
