//! # Named Queues
//!
//! Lease-based, at-least-once message queues consumed by the background task
//! host.
//!
//! - [`NamedQueue`] - put with visibility delay, lease, delete, clear
//! - [`QueueProvider`] - resolves configured queue keys to queues
//! - [`InMemoryNamedQueue`] / [`InMemoryQueueProvider`] - in-process backend
//!
//! A leased message is hidden from other consumers until its visibility
//! timeout elapses. Consumers acknowledge by deleting; anything not deleted
//! in time is redelivered with an incremented dequeue count.

mod memory;
mod queue;

pub use memory::{InMemoryNamedQueue, InMemoryQueueProvider};
pub use queue::{NamedQueue, QueueError, QueueMessage, QueueProvider};
