//! Postgres-backed task and user stores.
//!
//! Runtime-checked queries against a `PgPool`. `insert_with`/`update_with`
//! accept any Postgres executor, so callers can scope writes inside an
//! externally supplied `sqlx::Transaction`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use mailspool_core::{MailTask, TaskId, TaskStatus, UserAccount, UserId};

use super::{StorageError, TaskStore, UserStore};
use crate::config::DatabaseConfig;

const TASK_COLUMNS: &str = "id, user_id, status, try_count, recipient_email, subject, body, \
     scheduled_at, created_at, updated_at, deleted_at";

/// Open a connection pool for the configured database.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url())
        .await
        .map_err(|e| StorageError::Backend(format!("connect failed: {}", e)))
}

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::Backend(format!("migration failed: {}", e)))
}

fn status_to_db(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Success => "success",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::Scheduled => "scheduled",
    }
}

fn status_from_db(raw: &str) -> Result<TaskStatus, StorageError> {
    match raw {
        "queued" => Ok(TaskStatus::Queued),
        "success" => Ok(TaskStatus::Success),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        "scheduled" => Ok(TaskStatus::Scheduled),
        other => Err(StorageError::Backend(format!(
            "unknown task status in database: {}",
            other
        ))),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Backend(format!("{}: unique violation: {}", operation, db))
        }
        _ => StorageError::Backend(format!("{}: {}", operation, err)),
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    try_count: i32,
    recipient_email: String,
    subject: String,
    body: String,
    scheduled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for MailTask {
    type Error = StorageError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(MailTask {
            id: TaskId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            status: status_from_db(&row.status)?,
            try_count: row.try_count as u32,
            recipient_email: row.recipient_email,
            subject: row.subject,
            body: row.body,
            scheduled_at: row.scheduled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            // Sender identity is a wire-only enrichment; never persisted.
            sender: None,
        })
    }
}

fn rows_to_tasks(rows: Vec<TaskRow>) -> Result<Vec<MailTask>, StorageError> {
    rows.into_iter().map(MailTask::try_from).collect()
}

/// Postgres task store.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert against an arbitrary executor (pool, connection, or an open
    /// transaction).
    pub async fn insert_with<'e, E>(&self, task: &MailTask, executor: E) -> Result<(), StorageError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            INSERT INTO mail_tasks
                (id, user_id, status, try_count, recipient_email, subject, body,
                 scheduled_at, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(task.user_id.as_uuid())
        .bind(status_to_db(task.status))
        .bind(task.try_count as i32)
        .bind(&task.recipient_email)
        .bind(&task.subject)
        .bind(&task.body)
        .bind(task.scheduled_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.deleted_at)
        .execute(executor)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::AlreadyExists(task.id)
            }
            _ => map_sqlx_error("insert task", e),
        })?;
        Ok(())
    }

    /// Update against an arbitrary executor (see [`Self::insert_with`]).
    pub async fn update_with<'e, E>(&self, task: &MailTask, executor: E) -> Result<(), StorageError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE mail_tasks
            SET status = $2,
                try_count = $3,
                recipient_email = $4,
                subject = $5,
                body = $6,
                scheduled_at = $7,
                updated_at = $8
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(status_to_db(task.status))
        .bind(task.try_count as i32)
        .bind(&task.recipient_email)
        .bind(&task.subject)
        .bind(&task.body)
        .bind(task.scheduled_at)
        .bind(task.updated_at)
        .execute(executor)
        .await
        .map_err(|e| map_sqlx_error("update task", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TaskNotFound(task.id));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    async fn insert(&self, task: MailTask) -> Result<MailTask, StorageError> {
        self.insert_with(&task, &self.pool).await?;
        Ok(task)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&self, id: TaskId) -> Result<MailTask, StorageError> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM mail_tasks WHERE id = $1 AND deleted_at IS NULL",
            TASK_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get task", e))?;

        row.ok_or(StorageError::TaskNotFound(id))?.try_into()
    }

    #[instrument(skip(self), err)]
    async fn get_all(&self, user_id: UserId) -> Result<Vec<MailTask>, StorageError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM mail_tasks \
             WHERE user_id = $1 AND deleted_at IS NULL ORDER BY created_at",
            TASK_COLUMNS
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list tasks", e))?;

        rows_to_tasks(rows)
    }

    #[instrument(skip(self), err)]
    async fn get_all_unprocessed(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<MailTask>, StorageError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_after)
                .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM mail_tasks \
             WHERE status = $1 AND updated_at < $2 AND deleted_at IS NULL \
             ORDER BY updated_at",
            TASK_COLUMNS
        ))
        .bind(status_to_db(TaskStatus::Queued))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list unprocessed tasks", e))?;

        rows_to_tasks(rows)
    }

    #[instrument(skip(self), err)]
    async fn get_all_by_status(
        &self,
        status: TaskStatus,
        user_id: UserId,
    ) -> Result<Vec<MailTask>, StorageError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM mail_tasks \
             WHERE status = $1 AND user_id = $2 AND deleted_at IS NULL \
             ORDER BY created_at",
            TASK_COLUMNS
        ))
        .bind(status_to_db(status))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list tasks by status", e))?;

        rows_to_tasks(rows)
    }

    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    async fn update(&self, task: &MailTask) -> Result<(), StorageError> {
        self.update_with(task, &self.pool).await
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE mail_tasks SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete task", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::TaskNotFound(id));
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    smtp_host: String,
    smtp_port: i32,
    smtp_username: String,
    smtp_password: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            id: UserId::from_uuid(row.id),
            email: row.email,
            smtp_host: row.smtp_host,
            smtp_port: row.smtp_port as u16,
            smtp_username: row.smtp_username,
            smtp_password: row.smtp_password,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Postgres user store (read-only from the core's point of view).
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip(self), err)]
    async fn get_by_id(&self, id: UserId) -> Result<UserAccount, StorageError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, smtp_host, smtp_port, smtp_username, smtp_password, \
             created_at, updated_at \
             FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get user", e))?;

        row.map(UserAccount::from)
            .ok_or(StorageError::UserNotFound(id))
    }
}
