//! In-memory queue transport for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{QueueConsumer, QueueTransport, TransportError};

/// In-memory FIFO lists with blocking-pop semantics.
///
/// Cloning shares the underlying queues, so a clone can act as publisher,
/// consumer, or test observer against the same state.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    notify: Notify,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently waiting in a queue (test observability).
    pub fn queue_len(&self, queue: &str) -> usize {
        let queues = self.inner.queues.lock().unwrap();
        queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }

    fn take(&self, queue: &str) -> Option<Vec<u8>> {
        let mut queues = self.inner.queues.lock().unwrap();
        queues.get_mut(queue).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        {
            let mut queues = self.inner.queues.lock().unwrap();
            queues.entry(queue.to_string()).or_default().push_back(payload);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn consumer(&self) -> Result<Box<dyn QueueConsumer>, TransportError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl QueueConsumer for InMemoryTransport {
    async fn pop(
        &mut self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the wakeup before checking the queue so a concurrent push
            // between check and await is never missed.
            let notified = self.inner.notify.notified();
            if let Some(payload) = self.take(queue) {
                return Ok(Some(payload));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}
