//! Task registry for type-erased task creation
//!
//! The registry maps task type names (as used in processor configuration) to
//! factories that create fresh task instances, together with the converters
//! that feed them. Worker pools only ever see the erased [`AnyTask`] view.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::task::{
    ArgumentConverter, ConversionError, ResultConverter, Task, TaskError, TaskExecutionContext,
};

/// How a task type is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// One run per message leased from the request queue
    Queue,
    /// One run per trigger tick, without argument or result
    Trigger,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Trigger => write!(f, "trigger"),
        }
    }
}

/// Why a single task invocation did not complete
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    /// `setup` returned an error
    #[error("setup failed: {0}")]
    Setup(TaskError),

    /// The message body could not be converted into an argument
    #[error("argument conversion failed: {0}")]
    Conversion(ConversionError),

    /// `run` returned an error
    #[error("run failed: {0}")]
    Execution(TaskError),

    /// `run` panicked
    #[error("run panicked: {0}")]
    Panicked(String),

    /// The result could not be converted into a message body
    #[error("result conversion failed: {0}")]
    ResultConversion(ConversionError),
}

impl TaskFailure {
    /// Whether the input itself can never be processed
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::Conversion(_))
    }
}

/// Type-erased task interface
///
/// Each call creates, sets up and runs a fresh instance of the underlying
/// task type.
#[async_trait]
pub trait AnyTask: Send + Sync {
    /// Registered task type name
    fn task_type(&self) -> &str;

    /// How this task type is driven
    fn mode(&self) -> TaskMode;

    /// Run one instance
    ///
    /// `body` is the message body for queue-driven tasks and `None` for
    /// trigger ticks. Returns the converted result body, if any.
    async fn execute(
        &self,
        ctx: &TaskExecutionContext,
        body: Option<&str>,
    ) -> Result<Option<String>, TaskFailure>;
}

type Factory<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Queue-driven task binding: factory plus converters
struct QueueTaskBinding<T: Task> {
    task_type: String,
    factory: Factory<T>,
    argument_converter: Arc<dyn ArgumentConverter<T::Argument>>,
    result_converter: Arc<dyn ResultConverter<T::Output>>,
}

#[async_trait]
impl<T: Task> AnyTask for QueueTaskBinding<T> {
    fn task_type(&self) -> &str {
        &self.task_type
    }

    fn mode(&self) -> TaskMode {
        TaskMode::Queue
    }

    async fn execute(
        &self,
        ctx: &TaskExecutionContext,
        body: Option<&str>,
    ) -> Result<Option<String>, TaskFailure> {
        let body = body.ok_or_else(|| {
            TaskFailure::Conversion(ConversionError::malformed("missing message body"))
        })?;

        let mut task = create_guarded(&self.factory, ctx)?;

        let argument = guarded(|| self.argument_converter.convert_to_argument(body))
            .unwrap_or_else(|panic| {
                Err(ConversionError::malformed(format!("converter panicked: {panic}")))
            })
            .map_err(TaskFailure::Conversion)?;

        let output = run_guarded(&mut task, ctx, argument).await?;

        guarded(|| self.result_converter.convert_to_result(&output))
            .unwrap_or_else(|panic| {
                Err(ConversionError::malformed(format!("converter panicked: {panic}")))
            })
            .map(Some)
            .map_err(TaskFailure::ResultConversion)
    }
}

/// Trigger-driven task binding
struct TriggerTaskBinding<T> {
    task_type: String,
    factory: Factory<T>,
}

#[async_trait]
impl<T> AnyTask for TriggerTaskBinding<T>
where
    T: Task<Argument = (), Output = ()>,
{
    fn task_type(&self) -> &str {
        &self.task_type
    }

    fn mode(&self) -> TaskMode {
        TaskMode::Trigger
    }

    async fn execute(
        &self,
        ctx: &TaskExecutionContext,
        _body: Option<&str>,
    ) -> Result<Option<String>, TaskFailure> {
        let mut task = create_guarded(&self.factory, ctx)?;
        run_guarded(&mut task, ctx, ()).await?;
        Ok(None)
    }
}

/// Call a synchronous step, returning the panic message if it panics
fn guarded<R>(step: impl FnOnce() -> R) -> Result<R, String> {
    std::panic::catch_unwind(AssertUnwindSafe(step))
        .map_err(|panic| panic_message(panic.as_ref()))
}

/// Create and set up a fresh instance; a panic in either counts as a setup failure
fn create_guarded<T: Task>(
    factory: &Factory<T>,
    ctx: &TaskExecutionContext,
) -> Result<T, TaskFailure> {
    let created = guarded(|| {
        let mut task = (**factory)();
        task.setup(ctx).map(|()| task)
    });
    match created {
        Ok(Ok(task)) => Ok(task),
        Ok(Err(error)) => Err(TaskFailure::Setup(error)),
        Err(panic) => Err(TaskFailure::Setup(TaskError::new(format!(
            "setup panicked: {panic}"
        )))),
    }
}

/// Run a task, turning both errors and panics into [`TaskFailure`]
async fn run_guarded<T: Task>(
    task: &mut T,
    ctx: &TaskExecutionContext,
    argument: T::Argument,
) -> Result<T::Output, TaskFailure> {
    match AssertUnwindSafe(task.run(ctx, argument)).catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(error)) => Err(TaskFailure::Execution(error)),
        Err(panic) => Err(TaskFailure::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Registry of task types
///
/// # Example
///
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry
///     .register_queue_task("Echo", EchoTask::default, FromStrConverter, DisplayConverter)
///     .register_trigger_task("Heartbeat", HeartbeatTask::default);
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn AnyTask>>,
}

impl TaskRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue-driven task type with its converters
    pub fn register_queue_task<T, F, A, R>(
        &mut self,
        task_type: impl Into<String>,
        factory: F,
        argument_converter: A,
        result_converter: R,
    ) -> &mut Self
    where
        T: Task,
        F: Fn() -> T + Send + Sync + 'static,
        A: ArgumentConverter<T::Argument>,
        R: ResultConverter<T::Output>,
    {
        let task_type = task_type.into();
        let binding = QueueTaskBinding {
            task_type: task_type.clone(),
            factory: Arc::new(factory),
            argument_converter: Arc::new(argument_converter),
            result_converter: Arc::new(result_converter),
        };
        self.tasks.insert(task_type, Arc::new(binding));
        self
    }

    /// Register a trigger-driven task type
    pub fn register_trigger_task<T, F>(
        &mut self,
        task_type: impl Into<String>,
        factory: F,
    ) -> &mut Self
    where
        T: Task<Argument = (), Output = ()>,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let task_type = task_type.into();
        let binding = TriggerTaskBinding {
            task_type: task_type.clone(),
            factory: Arc::new(factory),
        };
        self.tasks.insert(task_type, Arc::new(binding));
        self
    }

    /// Check if a task type is registered
    pub fn contains(&self, task_type: &str) -> bool {
        self.tasks.contains_key(task_type)
    }

    /// Resolve a task type by name
    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn AnyTask>, RegistryError> {
        self.tasks
            .get(task_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTaskType(task_type.to_string()))
    }

    /// Get the number of registered task types
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get all registered task type names
    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Task type not registered
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
}
