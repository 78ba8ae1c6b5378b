//! Task trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskhost_queue::QueueError;

use super::TaskExecutionContext;

/// Error escaping a task's `setup` or `run`
///
/// Returning this error means the task could not finish. The message that
/// triggered the run is left unacknowledged, so the queue redelivers it once
/// the visibility timeout elapses. Recoverable domain failures should be
/// encoded in the task result instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,
}

impl TaskError {
    /// Create a new task error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

impl From<QueueError> for TaskError {
    fn from(err: QueueError) -> Self {
        Self::new(err.to_string()).with_type("queue")
    }
}

/// A task is a typed unit of work hosted by a worker pool
///
/// A fresh instance is created for every message (or trigger tick), set up
/// with the pool's [`TaskExecutionContext`], run exactly once, then dropped.
///
/// Queue-driven tasks are registered together with an argument converter
/// (message body to `Argument`) and a result converter (`Output` to response
/// body). Trigger-driven tasks use `()` for both and are invoked periodically.
///
/// # Example
///
/// ```ignore
/// use taskhost::prelude::*;
///
/// #[derive(Default)]
/// struct EchoTask;
///
/// #[async_trait]
/// impl Task for EchoTask {
///     type Argument = String;
///     type Output = String;
///
///     async fn run(
///         &mut self,
///         _ctx: &TaskExecutionContext,
///         argument: Self::Argument,
///     ) -> Result<Self::Output, TaskError> {
///         Ok(argument)
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + 'static {
    /// Argument produced by the argument converter
    type Argument: Send + 'static;

    /// Result consumed by the result converter
    type Output: Send + 'static;

    /// Prepare the instance before it runs
    ///
    /// Typically reads properties from the context. The context is passed to
    /// `run` as well, so overriding this is optional.
    fn setup(&mut self, _ctx: &TaskExecutionContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Execute the task once
    async fn run(
        &mut self,
        ctx: &TaskExecutionContext,
        argument: Self::Argument,
    ) -> Result<Self::Output, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let error = TaskError::new("connection refused");
        assert_eq!(error.to_string(), "connection refused");

        let error = error.with_type("io");
        assert_eq!(error.to_string(), "io: connection refused");
    }

    #[test]
    fn test_task_error_from_queue_error() {
        let error: TaskError = QueueError::UnknownQueue("requests".into()).into();
        assert_eq!(error.error_type.as_deref(), Some("queue"));
        assert!(error.message.contains("requests"));
    }

    #[test]
    fn test_task_error_serialization() {
        let error = TaskError::new("boom").with_type("TEST");
        let json = serde_json::to_string(&error).unwrap();
        let parsed: TaskError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, parsed);
    }
}
