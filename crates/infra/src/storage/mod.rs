//! Storage contracts for task and user records.

use std::time::Duration;

use async_trait::async_trait;

use mailspool_core::{MailTask, TaskId, TaskStatus, UserAccount, UserId};

mod memory;
mod postgres;

pub use memory::{InMemoryTaskStore, InMemoryUserStore};
pub use postgres::{PgTaskStore, PgUserStore, connect_pool, run_migrations};

/// Storage error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    #[error("storage error: {0}")]
    Backend(String),
}

/// Durable task record store.
///
/// Soft-deleted records are invisible to every query.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task record; returns the stored record.
    async fn insert(&self, task: MailTask) -> Result<MailTask, StorageError>;

    async fn get_by_id(&self, id: TaskId) -> Result<MailTask, StorageError>;

    /// All tasks owned by a user.
    async fn get_all(&self, user_id: UserId) -> Result<Vec<MailTask>, StorageError>;

    /// Queued tasks whose `updated_at` is older than `stale_after`,
    /// candidates for sweeper republish.
    async fn get_all_unprocessed(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<MailTask>, StorageError>;

    async fn get_all_by_status(
        &self,
        status: TaskStatus,
        user_id: UserId,
    ) -> Result<Vec<MailTask>, StorageError>;

    /// Persist the current state of an existing task.
    async fn update(&self, task: &MailTask) -> Result<(), StorageError>;

    /// Soft-delete a task.
    async fn delete(&self, id: TaskId) -> Result<(), StorageError>;
}

/// Read-only user record store.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: UserId) -> Result<UserAccount, StorageError>;
}
