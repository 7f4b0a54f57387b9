//! Queue transport abstraction.
//!
//! The broker never talks to Redis directly; it goes through
//! [`QueueTransport`], which models a durable named list with tail-push and
//! blocking head-pop semantics. The handle is constructor-injected
//! everywhere, so tests run against [`InMemoryTransport`] and production
//! against [`RedisTransport`].

use std::time::Duration;

use async_trait::async_trait;

mod memory;
mod redis;

pub use memory::InMemoryTransport;
pub use redis::RedisTransport;

/// Queue transport error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport connection error: {0}")]
    Connection(String),

    #[error("transport command error: {0}")]
    Command(String),
}

/// A durable FIFO list transport.
///
/// No ordering guarantee stronger than FIFO-per-list; concurrent publishers
/// may interleave.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Append a payload to the tail of the named list.
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Open a dedicated consumer handle.
    ///
    /// Blocking pops on one handle must not stall pops or pushes on another,
    /// so each broker consumer loop owns its own handle.
    async fn consumer(&self) -> Result<Box<dyn QueueConsumer>, TransportError>;
}

/// A dedicated blocking-pop handle onto a [`QueueTransport`].
#[async_trait]
pub trait QueueConsumer: Send {
    /// Pop from the head of the named list, blocking up to `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing available, which is
    /// the transport's normal idle condition, not an error.
    async fn pop(
        &mut self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError>;
}
