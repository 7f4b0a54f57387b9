//! In-memory stores for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use mailspool_core::{MailTask, TaskId, TaskStatus, UserAccount, UserId};

use super::{StorageError, TaskStore, UserStore};

/// In-memory task store.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, MailTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: MailTask) -> Result<MailTask, StorageError> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&task.id) {
            return Err(StorageError::AlreadyExists(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_by_id(&self, id: TaskId) -> Result<MailTask, StorageError> {
        let tasks = self.tasks.read().unwrap();
        tasks
            .get(&id)
            .filter(|t| t.deleted_at.is_none())
            .cloned()
            .ok_or(StorageError::TaskNotFound(id))
    }

    async fn get_all(&self, user_id: UserId) -> Result<Vec<MailTask>, StorageError> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.user_id == user_id && t.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn get_all_unprocessed(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<MailTask>, StorageError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_after)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Queued && t.updated_at < cutoff && t.deleted_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn get_all_by_status(
        &self,
        status: TaskStatus,
        user_id: UserId,
    ) -> Result<Vec<MailTask>, StorageError> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.status == status && t.user_id == user_id && t.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn update(&self, task: &MailTask) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().unwrap();
        if !tasks.contains_key(&task.id) {
            return Err(StorageError::TaskNotFound(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.deleted_at.is_none() => {
                task.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(StorageError::TaskNotFound(id)),
        }
    }
}

/// In-memory user store.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, UserAccount>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user (the core never writes users; this is for tests/dev).
    pub fn add(&self, user: UserAccount) {
        self.users.write().unwrap().insert(user.id, user);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_by_id(&self, id: UserId) -> Result<UserAccount, StorageError> {
        let users = self.users.read().unwrap();
        users.get(&id).cloned().ok_or(StorageError::UserNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> MailTask {
        MailTask::new(UserId::new(), "to@example.com", "subject", "body")
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = InMemoryTaskStore::new();
        let inserted = store.insert(task()).await.unwrap();
        let loaded = store.get_by_id(inserted.id).await.unwrap();
        assert_eq!(inserted, loaded);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryTaskStore::new();
        let t = store.insert(task()).await.unwrap();
        let err = store.insert(t).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn unprocessed_filters_on_status_and_staleness() {
        let store = InMemoryTaskStore::new();

        let mut stale = task();
        stale.updated_at = Utc::now() - chrono::Duration::minutes(10);
        let stale = store.insert(stale).await.unwrap();

        // Fresh queued task: not a candidate.
        store.insert(task()).await.unwrap();

        // Stale but already failed: not a candidate either.
        let mut failed = task();
        failed.status = TaskStatus::Failed;
        failed.updated_at = Utc::now() - chrono::Duration::minutes(10);
        store.insert(failed).await.unwrap();

        let unprocessed = store
            .get_all_unprocessed(Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].id, stale.id);
    }

    #[tokio::test]
    async fn soft_delete_hides_record() {
        let store = InMemoryTaskStore::new();
        let t = store.insert(task()).await.unwrap();
        store.delete(t.id).await.unwrap();
        assert!(matches!(
            store.get_by_id(t.id).await,
            Err(StorageError::TaskNotFound(_))
        ));
        assert!(store.get_all(t.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_query_scopes_to_user() {
        let store = InMemoryTaskStore::new();
        let mine = store.insert(task()).await.unwrap();
        let mut theirs = task();
        theirs.status = TaskStatus::Queued;
        store.insert(theirs).await.unwrap();

        let found = store
            .get_all_by_status(TaskStatus::Queued, mine.user_id)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, mine.id);
    }
}
