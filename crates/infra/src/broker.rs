//! Broker: hand-off between the durable queue transport and the in-process
//! worker channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use mailspool_core::MailTask;

use crate::transport::{QueueTransport, TransportError};

/// How long a consumer blocks on a pop before re-checking cancellation.
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Broker error.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("publish cancelled")]
    Cancelled,

    #[error("task serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("worker channel closed")]
    ChannelClosed,
}

/// Mediates between the queue transport and the shared worker channel.
///
/// Publishers serialize tasks onto a named list; `consumer_count` subscribe
/// loops pop, decode, and forward onto one bounded channel. The channel send
/// is allowed to block, which is the system's backpressure: full workers stop
/// the consumers, which stop draining the list.
#[derive(Clone)]
pub struct Broker {
    transport: Arc<dyn QueueTransport>,
    queue_name: String,
    consumer_count: usize,
    task_tx: mpsc::Sender<MailTask>,
}

impl Broker {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        queue_name: impl Into<String>,
        consumer_count: usize,
        task_tx: mpsc::Sender<MailTask>,
    ) -> Self {
        Self {
            transport,
            queue_name: queue_name.into(),
            consumer_count,
            task_tx,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Serialize a task and push it onto the tail of the queue list.
    ///
    /// Fails fast with [`BrokerError::Cancelled`] when the token is already
    /// cancelled, before touching the transport.
    pub async fn publish(
        &self,
        shutdown: &CancellationToken,
        task: &MailTask,
    ) -> Result<(), BrokerError> {
        if shutdown.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        let payload = task.to_payload()?;
        self.transport.push(&self.queue_name, payload).await?;
        debug!(task_id = %task.id, queue = %self.queue_name, "task published");
        Ok(())
    }

    /// One consumer loop: blocking-pop, decode, forward.
    ///
    /// - pop timeout: re-check cancellation and continue;
    /// - transport error: return it, the loop terminates (no reconnect);
    /// - decode failure: log and drop the payload, continue;
    /// - decode success: send onto the shared bounded channel.
    pub async fn subscribe(
        &self,
        shutdown: CancellationToken,
        consumer_id: usize,
    ) -> Result<(), BrokerError> {
        let mut consumer = self.transport.consumer().await?;
        info!(consumer_id, queue = %self.queue_name, "consumer subscribed");
        loop {
            if shutdown.is_cancelled() {
                info!(consumer_id, "consumer stopping");
                return Ok(());
            }
            let Some(payload) = consumer.pop(&self.queue_name, POP_TIMEOUT).await? else {
                continue;
            };
            let task = match MailTask::from_payload(&payload) {
                Ok(task) => task,
                Err(err) => {
                    // Dropped, not dead-lettered.
                    error!(consumer_id, error = %err, "dropping undecodable payload");
                    continue;
                }
            };
            let task_id = task.id;
            debug!(consumer_id, %task_id, "task received");
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // The task is still recorded as queued in storage; the
                    // sweeper republishes it once stale.
                    info!(consumer_id, %task_id, "consumer stopping mid-handoff");
                    return Ok(());
                }
                sent = self.task_tx.send(task) => {
                    if sent.is_err() {
                        return Err(BrokerError::ChannelClosed);
                    }
                }
            }
        }
    }

    /// Spawn `consumer_count` subscribe loops.
    ///
    /// Returns immediately with a channel of terminal consumer errors; the
    /// channel closes once every consumer has exited.
    pub fn start_consume(&self, shutdown: CancellationToken) -> mpsc::Receiver<BrokerError> {
        let (err_tx, err_rx) = mpsc::channel(self.consumer_count.max(1));
        for consumer_id in 1..=self.consumer_count {
            let broker = self.clone();
            let token = shutdown.clone();
            let err_tx = err_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = broker.subscribe(token, consumer_id).await {
                    error!(consumer_id, error = %err, "consumer terminated");
                    let _ = err_tx.send(err).await;
                }
            });
        }
        err_rx
    }
}
