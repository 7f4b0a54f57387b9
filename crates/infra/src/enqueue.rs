//! Enqueue façade: persist a task, enrich it with the owner's sender
//! identity, and publish it to the queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use mailspool_core::{MailTask, TaskId, TaskStatus, UserId};

use crate::broker::{Broker, BrokerError};
use crate::storage::{StorageError, TaskStore, UserStore};

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("enqueue cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Publish(#[from] BrokerError),
}

/// What a caller supplies to enqueue a mail task.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub user_id: UserId,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    fn into_task(self) -> MailTask {
        let task = MailTask::new(self.user_id, self.recipient_email, self.subject, self.body);
        match self.scheduled_at {
            Some(at) => task.with_scheduled_at(at),
            None => task,
        }
    }
}

/// Application-facing task operations.
#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserStore>,
    broker: Broker,
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskStore>, users: Arc<dyn UserStore>, broker: Broker) -> Self {
        Self {
            tasks,
            users,
            broker,
        }
    }

    /// Persist and publish a new mail task, returning its id.
    ///
    /// The durable row is written before the publish, so a publish failure
    /// leaves a `Queued` row behind for the sweeper to pick up; the error
    /// is still surfaced to the caller.
    #[instrument(skip(self, shutdown, request), fields(user_id = %request.user_id), err)]
    pub async fn enqueue_mail_task(
        &self,
        shutdown: &CancellationToken,
        request: EnqueueRequest,
    ) -> Result<TaskId, EnqueueError> {
        if shutdown.is_cancelled() {
            return Err(EnqueueError::Cancelled);
        }

        let task = self.tasks.insert(request.into_task()).await?;
        let user = self.users.get_by_id(task.user_id).await?;
        let task = task.with_sender(user.sender_identity());

        if let Err(err) = self.broker.publish(shutdown, &task).await {
            warn!(task_id = %task.id, error = %err, "task persisted but publish failed");
            return Err(err.into());
        }

        debug!(task_id = %task.id, "task enqueued");
        Ok(task.id)
    }

    /// All live tasks owned by a user.
    pub async fn get_all_queued_tasks(
        &self,
        user_id: UserId,
    ) -> Result<Vec<MailTask>, EnqueueError> {
        Ok(self.tasks.get_all(user_id).await?)
    }

    /// Tasks a user gave up on: retries exhausted, terminally cancelled.
    pub async fn get_all_failed_tasks(
        &self,
        user_id: UserId,
    ) -> Result<Vec<MailTask>, EnqueueError> {
        Ok(self
            .tasks
            .get_all_by_status(TaskStatus::Cancelled, user_id)
            .await?)
    }
}
