//! Task execution context

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use taskhost_queue::{NamedQueue, QueueError, QueueProvider};
use tracing::warn;

use crate::config::{effective_properties, PropertyMap};

/// Read-only view shared by every worker of one pool
///
/// Holds the processor's properties merged over the host's default context,
/// plus access to the named queues. A context is built once per pool and is
/// replaced only when the processor's configuration changes.
///
/// # Example
///
/// ```ignore
/// fn setup(&mut self, ctx: &TaskExecutionContext) -> Result<(), TaskError> {
///     self.batch_size = ctx.get_property("BatchSize", 100u32);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TaskExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    processor_name: String,
    properties: PropertyMap,
    queues: Arc<dyn QueueProvider>,
}

impl TaskExecutionContext {
    /// Create a context for a processor
    pub fn new(
        processor_name: impl Into<String>,
        default_context: &PropertyMap,
        properties: &PropertyMap,
        queues: Arc<dyn QueueProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                processor_name: processor_name.into(),
                properties: effective_properties(default_context, properties),
                queues,
            }),
        }
    }

    /// Name of the processor this context belongs to
    pub fn processor_name(&self) -> &str {
        &self.inner.processor_name
    }

    /// Raw property value, processor-specific first, then the default context
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.inner.properties.get(name)
    }

    /// Effective properties
    pub fn properties(&self) -> &PropertyMap {
        &self.inner.properties
    }

    /// Typed property lookup with a fallback default
    ///
    /// String values that do not deserialize directly are parsed as JSON
    /// text, so `"100"` can be read as a number. Values of the wrong type
    /// yield `default`.
    pub fn get_property<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        let Some(value) = self.property(name) else {
            return default;
        };

        if let Ok(typed) = serde_json::from_value::<T>(value.clone()) {
            return typed;
        }
        if let Value::String(text) = value {
            if let Ok(typed) = serde_json::from_str::<T>(text) {
                return typed;
            }
        }

        warn!(
            processor = %self.inner.processor_name,
            property = name,
            value = %value,
            "Property has an unexpected type, using default"
        );
        default
    }

    /// Resolve a named queue
    pub fn queue(&self, key: &str) -> Result<Arc<dyn NamedQueue>, QueueError> {
        self.inner.queues.queue(key)
    }
}

impl fmt::Debug for TaskExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutionContext")
            .field("processor_name", &self.inner.processor_name)
            .field("properties", &self.inner.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskhost_queue::InMemoryQueueProvider;

    fn context(defaults: PropertyMap, properties: PropertyMap) -> TaskExecutionContext {
        TaskExecutionContext::new(
            "Processor",
            &defaults,
            &properties,
            Arc::new(InMemoryQueueProvider::new()),
        )
    }

    fn map(entries: &[(&str, Value)]) -> PropertyMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_processor_property_wins() {
        let ctx = context(
            map(&[("BatchSize", json!(10))]),
            map(&[("BatchSize", json!(25))]),
        );
        assert_eq!(ctx.get_property("BatchSize", 100u32), 25);
    }

    #[test]
    fn test_falls_back_to_default_context() {
        let ctx = context(map(&[("Region", json!("eu"))]), PropertyMap::new());
        assert_eq!(ctx.get_property("Region", "us".to_string()), "eu");
    }

    #[test]
    fn test_falls_back_to_supplied_default() {
        let ctx = context(PropertyMap::new(), PropertyMap::new());
        assert_eq!(ctx.get_property("BatchSize", 100u32), 100);
        assert!(ctx.property("BatchSize").is_none());
    }

    #[test]
    fn test_string_values_are_coerced() {
        let ctx = context(
            PropertyMap::new(),
            map(&[("BatchSize", json!("42")), ("Enabled", json!("true"))]),
        );
        assert_eq!(ctx.get_property("BatchSize", 0u32), 42);
        assert!(ctx.get_property("Enabled", false));
    }

    #[test]
    fn test_wrong_type_yields_default() {
        let ctx = context(PropertyMap::new(), map(&[("BatchSize", json!("lots"))]));
        assert_eq!(ctx.get_property("BatchSize", 7u32), 7);
    }

    #[test]
    fn test_queue_access() {
        let ctx = context(PropertyMap::new(), PropertyMap::new());
        assert_eq!(ctx.queue("requests").unwrap().name(), "requests");
        assert_eq!(ctx.processor_name(), "Processor");
    }
}
