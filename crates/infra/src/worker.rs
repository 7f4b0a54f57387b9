//! Delivery worker pool.
//!
//! Workers pull tasks from the broker's bounded channel, attempt delivery,
//! and record the outcome. A failed attempt bumps the task's try count; at
//! the configured maximum the task is cancelled, otherwise it is marked
//! failed and republished for another attempt. Bookkeeping writes that fail
//! are logged and do not abort the worker.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use mailspool_core::{MailTask, TaskId, TaskStatus};

use crate::broker::Broker;
use crate::delivery::MailTransport;
use crate::storage::TaskStore;

/// Receiver end of the broker channel, shared by every worker in the pool.
pub type SharedTaskReceiver = Arc<Mutex<mpsc::Receiver<MailTask>>>;

/// Why a worker's run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The shutdown token fired.
    Shutdown,
    /// All channel senders dropped; no more tasks will arrive.
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("task handling cancelled")]
    Cancelled,

    #[error("task {task_id} cancelled after {tries} tries")]
    TriesExhausted { task_id: TaskId, tries: u32 },
}

/// A single delivery worker.
pub struct Worker {
    id: usize,
    store: Arc<dyn TaskStore>,
    broker: Broker,
    mailer: Arc<dyn MailTransport>,
    tasks: SharedTaskReceiver,
    shutdown: CancellationToken,
    max_try_count: u32,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        store: Arc<dyn TaskStore>,
        broker: Broker,
        mailer: Arc<dyn MailTransport>,
        tasks: SharedTaskReceiver,
        shutdown: CancellationToken,
        max_try_count: u32,
    ) -> Self {
        Self {
            id,
            store,
            broker,
            mailer,
            tasks,
            shutdown,
            max_try_count,
        }
    }

    /// Run until shutdown or until the task channel closes.
    ///
    /// Per-task errors are logged and never stop the loop.
    pub async fn run(self) -> WorkerExit {
        info!(worker_id = self.id, "worker started");
        loop {
            let task = {
                let mut rx = self.tasks.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!(worker_id = self.id, "worker shutting down");
                        return WorkerExit::Shutdown;
                    }
                    received = rx.recv() => match received {
                        Some(task) => task,
                        None => {
                            info!(worker_id = self.id, "task channel closed");
                            return WorkerExit::ChannelClosed;
                        }
                    },
                }
            };

            if let Err(err) = self.handle_task(task).await {
                warn!(worker_id = self.id, error = %err, "task handling failed");
            }
        }
    }

    #[instrument(skip(self, task), fields(worker_id = self.id, task_id = %task.id))]
    async fn handle_task(&self, mut task: MailTask) -> Result<(), WorkerError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        match self.mailer.send(&task).await {
            Ok(()) => {
                task.mark_success();
                if let Err(err) = self.store.update(&task).await {
                    error!(error = %err, "failed to record successful delivery");
                }
                debug!("mail delivered");
                Ok(())
            }
            Err(send_err) => {
                warn!(error = %send_err, try_count = task.try_count + 1, "delivery attempt failed");
                let next = task.record_failure(self.max_try_count);
                if let Err(err) = self.store.update(&task).await {
                    error!(error = %err, "failed to record delivery failure");
                }
                match next {
                    TaskStatus::Cancelled => Err(WorkerError::TriesExhausted {
                        task_id: task.id,
                        tries: task.try_count,
                    }),
                    _ => {
                        if let Err(err) = self.broker.publish(&self.shutdown, &task).await {
                            error!(error = %err, "failed to republish task for retry");
                        }
                        Ok(())
                    }
                }
            }
        }
    }
}

/// Spawn `count` workers sharing one receiver.
pub fn spawn_pool(
    count: usize,
    store: Arc<dyn TaskStore>,
    broker: Broker,
    mailer: Arc<dyn MailTransport>,
    task_rx: mpsc::Receiver<MailTask>,
    shutdown: CancellationToken,
    max_try_count: u32,
) -> Vec<JoinHandle<WorkerExit>> {
    let tasks: SharedTaskReceiver = Arc::new(Mutex::new(task_rx));
    (1..=count)
        .map(|id| {
            let worker = Worker::new(
                id,
                Arc::clone(&store),
                broker.clone(),
                Arc::clone(&mailer),
                Arc::clone(&tasks),
                shutdown.clone(),
                max_try_count,
            );
            tokio::spawn(worker.run())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryError;
    use crate::storage::{InMemoryTaskStore, StorageError};
    use crate::transport::InMemoryTransport;
    use async_trait::async_trait;
    use mailspool_core::{SenderIdentity, UserId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const QUEUE: &str = "mail_queue";

    fn sender() -> SenderIdentity {
        SenderIdentity {
            email: "ops@example.com".into(),
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            smtp_username: "ops".into(),
            smtp_password: "secret".into(),
        }
    }

    fn task() -> MailTask {
        MailTask::new(UserId::new(), "to@example.com", "hi", "body").with_sender(sender())
    }

    /// Mailer that fails the first `fail_first` sends and succeeds after.
    struct ScriptedMailer {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl ScriptedMailer {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedMailer {
        async fn send(&self, _task: &MailTask) -> Result<(), DeliveryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(DeliveryError::Send("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Store whose updates always fail, for bookkeeping-tolerance tests.
    struct FailingUpdateStore {
        inner: InMemoryTaskStore,
    }

    #[async_trait]
    impl TaskStore for FailingUpdateStore {
        async fn insert(&self, task: MailTask) -> Result<MailTask, StorageError> {
            self.inner.insert(task).await
        }
        async fn get_by_id(&self, id: TaskId) -> Result<MailTask, StorageError> {
            self.inner.get_by_id(id).await
        }
        async fn get_all(&self, user_id: UserId) -> Result<Vec<MailTask>, StorageError> {
            self.inner.get_all(user_id).await
        }
        async fn get_all_unprocessed(
            &self,
            stale_after: Duration,
        ) -> Result<Vec<MailTask>, StorageError> {
            self.inner.get_all_unprocessed(stale_after).await
        }
        async fn get_all_by_status(
            &self,
            status: TaskStatus,
            user_id: UserId,
        ) -> Result<Vec<MailTask>, StorageError> {
            self.inner.get_all_by_status(status, user_id).await
        }
        async fn update(&self, _task: &MailTask) -> Result<(), StorageError> {
            Err(StorageError::Backend("update rejected".into()))
        }
        async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
            self.inner.delete(id).await
        }
    }

    struct Harness {
        store: Arc<InMemoryTaskStore>,
        transport: InMemoryTransport,
        broker: Broker,
        shutdown: CancellationToken,
    }

    fn harness() -> (Harness, mpsc::Receiver<MailTask>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let transport = InMemoryTransport::new();
        let (tx, rx) = mpsc::channel(16);
        let broker = Broker::new(Arc::new(transport.clone()), QUEUE, 1, tx);
        (
            Harness {
                store,
                transport,
                broker,
                shutdown: CancellationToken::new(),
            },
            rx,
        )
    }

    fn worker(h: &Harness, mailer: Arc<dyn MailTransport>, rx: mpsc::Receiver<MailTask>) -> Worker {
        Worker::new(
            1,
            h.store.clone() as Arc<dyn TaskStore>,
            h.broker.clone(),
            mailer,
            Arc::new(Mutex::new(rx)),
            h.shutdown.clone(),
            3,
        )
    }

    #[tokio::test]
    async fn successful_delivery_marks_success() {
        let (h, rx) = harness();
        let mailer = Arc::new(ScriptedMailer::new(0));
        let t = h.store.insert(task()).await.unwrap();
        let w = worker(&h, mailer.clone(), rx);

        w.handle_task(t.clone()).await.unwrap();

        let stored = h.store.get_by_id(t.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
        assert_eq!(stored.try_count, 0);
        assert_eq!(mailer.calls(), 1);
        assert_eq!(h.transport.queue_len(QUEUE), 0);
    }

    #[tokio::test]
    async fn failed_delivery_republishes_once() {
        let (h, rx) = harness();
        let mailer = Arc::new(ScriptedMailer::new(1));
        let t = h.store.insert(task()).await.unwrap();
        let w = worker(&h, mailer, rx);

        w.handle_task(t.clone()).await.unwrap();

        let stored = h.store.get_by_id(t.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.try_count, 1);
        assert_eq!(h.transport.queue_len(QUEUE), 1);
    }

    #[tokio::test]
    async fn exhausted_tries_cancel_without_republish() {
        let (h, rx) = harness();
        let mailer = Arc::new(ScriptedMailer::new(u32::MAX));
        let mut t = task();
        t.try_count = 2;
        let t = h.store.insert(t).await.unwrap();
        let w = worker(&h, mailer, rx);

        let err = w.handle_task(t.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::TriesExhausted { tries: 3, .. }
        ));

        let stored = h.store.get_by_id(t.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert_eq!(h.transport.queue_len(QUEUE), 0);
    }

    #[tokio::test]
    async fn bookkeeping_failure_does_not_stop_retry() {
        let (h, rx) = harness();
        let store = Arc::new(FailingUpdateStore {
            inner: InMemoryTaskStore::new(),
        });
        store.insert(task()).await.unwrap();
        let mailer = Arc::new(ScriptedMailer::new(1));
        let w = Worker::new(
            1,
            store.clone() as Arc<dyn TaskStore>,
            h.broker.clone(),
            mailer,
            Arc::new(Mutex::new(rx)),
            h.shutdown.clone(),
            3,
        );

        // Update fails but the retry republish still happens.
        w.handle_task(task()).await.unwrap();
        assert_eq!(h.transport.queue_len(QUEUE), 1);
    }

    #[tokio::test]
    async fn cancellation_exits_run_loop() {
        let (h, rx) = harness();
        let mailer = Arc::new(ScriptedMailer::new(0));
        let w = worker(&h, mailer, rx);
        let handle = tokio::spawn(w.run());

        h.shutdown.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, WorkerExit::Shutdown);
    }

    #[tokio::test]
    async fn closed_channel_exits_run_loop() {
        // The worker's own broker republishes into a separate channel, so
        // dropping this sender closes the channel the worker consumes.
        let (h, _broker_rx) = harness();
        let (tx, rx) = mpsc::channel::<MailTask>(1);
        drop(tx);
        let mailer = Arc::new(ScriptedMailer::new(0));
        let w = worker(&h, mailer, rx);
        let exit = tokio::time::timeout(Duration::from_secs(1), w.run())
            .await
            .unwrap();
        assert_eq!(exit, WorkerExit::ChannelClosed);
    }

    #[tokio::test]
    async fn pool_processes_tasks_from_a_shared_channel() {
        let store = Arc::new(InMemoryTaskStore::new());
        let transport = InMemoryTransport::new();
        let (tx, rx) = mpsc::channel(16);
        let broker = Broker::new(Arc::new(transport), QUEUE, 1, tx.clone());
        let shutdown = CancellationToken::new();
        let mailer = Arc::new(ScriptedMailer::new(0));

        let mut inserted = Vec::new();
        for _ in 0..4 {
            inserted.push(store.insert(task()).await.unwrap());
        }

        let handles = spawn_pool(
            2,
            store.clone() as Arc<dyn TaskStore>,
            broker,
            mailer,
            rx,
            shutdown.clone(),
            3,
        );

        for t in &inserted {
            tx.send(t.clone()).await.unwrap();
        }

        // Wait for every task to reach a terminal success state.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let mut done = true;
            for t in &inserted {
                if store.get_by_id(t.id).await.unwrap().status != TaskStatus::Success {
                    done = false;
                    break;
                }
            }
            if done {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "tasks not processed in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), WorkerExit::Shutdown);
        }
    }
}
