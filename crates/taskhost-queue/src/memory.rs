//! In-memory implementation of NamedQueue

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

use super::queue::*;

/// Internal message state
struct StoredMessage {
    id: Uuid,
    body: String,
    dequeue_count: u32,
    pop_receipt: Option<Uuid>,
    visible_at: Instant,
    inserted_at: chrono::DateTime<Utc>,
}

/// In-memory implementation of NamedQueue
///
/// Provides the same leasing semantics as a durable backend (visibility
/// delay, visibility timeout, dequeue count, pop receipts) without
/// persistence. Time is measured with `tokio::time`, so tests can pause and
/// advance the clock.
///
/// # Example
///
/// ```
/// use taskhost_queue::InMemoryNamedQueue;
///
/// let queue = InMemoryNamedQueue::new("requests");
/// ```
pub struct InMemoryNamedQueue {
    name: String,
    messages: Mutex<VecDeque<StoredMessage>>,
}

impl InMemoryNamedQueue {
    /// Create a new empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of messages currently visible
    pub fn visible_count(&self) -> usize {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.visible_at <= now)
            .count()
    }

    /// Number of messages, visible or leased
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Check if the queue holds no messages
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Bodies of every stored message in insertion order
    pub fn bodies(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.body.clone()).collect()
    }
}

fn deadline(now: Instant, delay: Duration) -> Result<Instant, QueueError> {
    now.checked_add(delay)
        .ok_or_else(|| QueueError::Backend(format!("visibility duration out of range: {delay:?}")))
}

#[async_trait]
impl NamedQueue for InMemoryNamedQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_message(
        &self,
        body: &str,
        visibility_delay: Duration,
    ) -> Result<Uuid, QueueError> {
        let visible_at = deadline(Instant::now(), visibility_delay)?;
        let id = Uuid::now_v7();
        self.messages.lock().push_back(StoredMessage {
            id,
            body: body.to_string(),
            dequeue_count: 0,
            pop_receipt: None,
            visible_at,
            inserted_at: Utc::now(),
        });
        trace!(queue = %self.name, %id, "Message enqueued");
        Ok(id)
    }

    async fn get_message(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let now = Instant::now();
        let visible_at = deadline(now, visibility_timeout)?;
        let mut messages = self.messages.lock();

        let Some(message) = messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        let pop_receipt = Uuid::now_v7();
        message.dequeue_count += 1;
        message.pop_receipt = Some(pop_receipt);
        message.visible_at = visible_at;

        Ok(Some(QueueMessage {
            id: message.id,
            body: message.body.clone(),
            dequeue_count: message.dequeue_count,
            pop_receipt,
            inserted_at: message.inserted_at,
        }))
    }

    async fn delete_message(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        let index = messages
            .iter()
            .position(|m| m.id == message.id)
            .ok_or(QueueError::MessageNotFound(message.id))?;

        if messages[index].pop_receipt != Some(message.pop_receipt) {
            return Err(QueueError::LeaseLost(message.id));
        }

        messages.remove(index);
        Ok(())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        self.messages.lock().clear();
        Ok(())
    }

    async fn approximate_count(&self) -> Result<usize, QueueError> {
        Ok(self.len())
    }
}

/// Queue provider that creates in-memory queues on first use
///
/// Every key maps to exactly one queue for the lifetime of the provider, so
/// producers and consumers configured with the same key share messages.
#[derive(Default)]
pub struct InMemoryQueueProvider {
    queues: DashMap<String, Arc<InMemoryNamedQueue>>,
    fixed: bool,
}

impl InMemoryQueueProvider {
    /// Create a provider that creates queues lazily
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider that only knows the given queue keys
    pub fn with_queues<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queues = DashMap::new();
        for key in keys {
            let key = key.into();
            queues.insert(key.clone(), Arc::new(InMemoryNamedQueue::new(key)));
        }
        Self {
            queues,
            fixed: true,
        }
    }

    /// Create a queue under `key`, also on a fixed provider
    pub fn create(&self, key: &str) -> Arc<InMemoryNamedQueue> {
        let queue = self
            .queues
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(InMemoryNamedQueue::new(key)));
        Arc::clone(queue.value())
    }

    /// Typed access to a queue, creating it if the provider is lazy
    pub fn get(&self, key: &str) -> Result<Arc<InMemoryNamedQueue>, QueueError> {
        if let Some(queue) = self.queues.get(key) {
            return Ok(Arc::clone(queue.value()));
        }
        if self.fixed {
            return Err(QueueError::UnknownQueue(key.to_string()));
        }
        Ok(self.create(key))
    }
}

impl QueueProvider for InMemoryQueueProvider {
    fn queue(&self, key: &str) -> Result<Arc<dyn NamedQueue>, QueueError> {
        let queue: Arc<dyn NamedQueue> = self.get(key)?;
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_put_and_get_message() {
        let queue = InMemoryNamedQueue::new("test");
        let id = queue.put_message("hello", Duration::ZERO).await.unwrap();

        let message = queue.get_message(LEASE).await.unwrap().unwrap();
        assert_eq!(message.id, id);
        assert_eq!(message.body, "hello");
        assert_eq!(message.dequeue_count, 1);
    }

    #[tokio::test]
    async fn test_leased_message_is_hidden() {
        let queue = InMemoryNamedQueue::new("test");
        queue.put_message("only", Duration::ZERO).await.unwrap();

        assert!(queue.get_message(LEASE).await.unwrap().is_some());
        assert!(queue.get_message(LEASE).await.unwrap().is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.visible_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_reappears_after_visibility_timeout() {
        let queue = InMemoryNamedQueue::new("test");
        queue.put_message("retry me", Duration::ZERO).await.unwrap();

        let first = queue
            .get_message(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let second = queue.get_message(LEASE).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.dequeue_count, 2);
        assert_ne!(second.pop_receipt, first.pop_receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_delay() {
        let queue = InMemoryNamedQueue::new("test");
        queue
            .put_message("later", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(queue.get_message(LEASE).await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(queue.get_message(LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_message() {
        let queue = InMemoryNamedQueue::new("test");
        queue.put_message("done", Duration::ZERO).await.unwrap();

        let message = queue.get_message(LEASE).await.unwrap().unwrap();
        queue.delete_message(&message).await.unwrap();

        assert!(queue.is_empty());
        assert!(matches!(
            queue.delete_message(&message).await,
            Err(QueueError::MessageNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_with_stale_receipt() {
        let queue = InMemoryNamedQueue::new("test");
        queue.put_message("contended", Duration::ZERO).await.unwrap();

        let stale = queue
            .get_message(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let current = queue.get_message(LEASE).await.unwrap().unwrap();

        assert!(matches!(
            queue.delete_message(&stale).await,
            Err(QueueError::LeaseLost(_))
        ));
        queue.delete_message(&current).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = InMemoryNamedQueue::new("test");
        queue.put_message("a", Duration::ZERO).await.unwrap();
        queue.put_message("b", Duration::ZERO).await.unwrap();

        queue.clear().await.unwrap();
        assert!(queue.get_message(LEASE).await.unwrap().is_none());

        queue.put_message("c", Duration::ZERO).await.unwrap();
        let message = queue.get_message(LEASE).await.unwrap().unwrap();
        assert_eq!(message.body, "c");
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryNamedQueue::new("test");
        for body in ["1", "2", "3"] {
            queue.put_message(body, Duration::ZERO).await.unwrap();
        }

        let mut bodies = vec![];
        while let Some(message) = queue.get_message(LEASE).await.unwrap() {
            bodies.push(message.body);
        }
        assert_eq!(bodies, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_out_of_range_durations_are_rejected() {
        let queue = InMemoryNamedQueue::new("test");
        assert!(matches!(
            queue.put_message("never", Duration::MAX).await,
            Err(QueueError::Backend(_))
        ));
        assert!(queue.is_empty());

        queue.put_message("now", Duration::ZERO).await.unwrap();
        assert!(matches!(
            queue.get_message(Duration::MAX).await,
            Err(QueueError::Backend(_))
        ));
        let message = queue.get_message(LEASE).await.unwrap().unwrap();
        assert_eq!(message.dequeue_count, 1);
    }

    #[test]
    fn test_lazy_provider_shares_queues() {
        let provider = InMemoryQueueProvider::new();
        let a = provider.get("requests").unwrap();
        let b = provider.get("requests").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_fixed_provider_rejects_unknown_keys() {
        let provider = InMemoryQueueProvider::with_queues(["requests"]);
        assert!(provider.queue("requests").is_ok());
        assert!(matches!(
            provider.queue("responses"),
            Err(QueueError::UnknownQueue(_))
        ));

        provider.create("responses");
        assert!(provider.queue("responses").is_ok());
    }
}
