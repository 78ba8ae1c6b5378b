//! NamedQueue trait definition

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No queue is registered under the key
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Message no longer exists in the queue
    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    /// The lease expired and the message was handed to another consumer
    #[error("lease lost for message {0}")]
    LeaseLost(Uuid),

    /// Backend failure
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// A message leased from a [`NamedQueue`]
///
/// The `pop_receipt` identifies the current lease; it changes every time the
/// message is handed out, so only the latest consumer can delete it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: Uuid,
    pub body: String,
    pub dequeue_count: u32,
    pub pop_receipt: Uuid,
    pub inserted_at: DateTime<Utc>,
}

/// Durable at-least-once message queue with visibility-timeout leasing
///
/// A message obtained from [`get_message`](NamedQueue::get_message) stays
/// hidden from other consumers for the requested visibility timeout. If it is
/// not deleted before the timeout elapses it becomes visible again and its
/// dequeue count grows on the next lease.
#[async_trait]
pub trait NamedQueue: Send + Sync + 'static {
    /// Queue name
    fn name(&self) -> &str;

    /// Append a message; it becomes visible after `visibility_delay`
    async fn put_message(
        &self,
        body: &str,
        visibility_delay: Duration,
    ) -> Result<Uuid, QueueError>;

    /// Lease the next visible message, if any
    async fn get_message(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError>;

    /// Acknowledge a leased message
    async fn delete_message(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Remove every message
    async fn clear(&self) -> Result<(), QueueError>;

    /// Approximate number of messages, visible or leased
    async fn approximate_count(&self) -> Result<usize, QueueError>;
}

/// Resolves queue keys (as used in processor configuration) to queues
pub trait QueueProvider: Send + Sync + 'static {
    fn queue(&self, key: &str) -> Result<Arc<dyn NamedQueue>, QueueError>;
}
