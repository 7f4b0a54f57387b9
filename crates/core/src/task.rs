//! Mail task record and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{TaskId, UserId};
use crate::user::SenderIdentity;

/// Task lifecycle status.
///
/// `Scheduled` is reserved for future delayed scheduling and is never
/// produced by the current transitions; `scheduled_at` on the record is
/// advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted and published (or eligible for republish by the sweeper).
    Queued,
    /// A delivery attempt was confirmed successful.
    Success,
    /// The last delivery attempt failed; the task was republished.
    Failed,
    /// Retries exhausted; terminal.
    Cancelled,
    /// Reserved future state, not reached by current transitions.
    Scheduled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Cancelled)
    }
}

/// A durable mail delivery task.
///
/// The record is also the queue wire payload: it serializes to a JSON
/// object carrying `id`, `user_id`, `status`, `try_count`,
/// `recipient_email`, `subject`, `body`, `scheduled_at`, the record
/// timestamps, and the optional resolved sender identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailTask {
    pub id: TaskId,
    pub user_id: UserId,
    pub status: TaskStatus,
    pub try_count: u32,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    /// Advisory; not acted on by the queue core.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker, set by an administrative path outside the core.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Sender identity resolved at enqueue time from the owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderIdentity>,
}

impl MailTask {
    /// Create a new task in `Queued` state with zero attempts.
    pub fn new(
        user_id: UserId,
        recipient_email: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            user_id,
            status: TaskStatus::Queued,
            try_count: 0,
            recipient_email: recipient_email.into(),
            subject: subject.into(),
            body: body.into(),
            scheduled_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sender: None,
        }
    }

    /// Attach the advisory schedule timestamp.
    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Attach the resolved sender identity (enrichment at enqueue time).
    pub fn with_sender(mut self, sender: SenderIdentity) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Mark a confirmed successful delivery.
    pub fn mark_success(&mut self) {
        self.status = TaskStatus::Success;
        self.touch();
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments `try_count` (the only place it ever moves) and resolves
    /// the next status: `Cancelled` once `max_try_count` is reached,
    /// `Failed` (retry via republish) otherwise. Returns the new status.
    pub fn record_failure(&mut self, max_try_count: u32) -> TaskStatus {
        self.try_count += 1;
        self.status = if self.try_count >= max_try_count {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        self.touch();
        self.status
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Serialize to the queue wire payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a task from a queue wire payload.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::SenderIdentity;
    use proptest::prelude::*;

    fn sender() -> SenderIdentity {
        SenderIdentity {
            email: "ops@example.com".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_username: "ops".to_string(),
            smtp_password: "hunter2".to_string(),
        }
    }

    #[test]
    fn new_task_starts_queued_with_zero_tries() {
        let task = MailTask::new(UserId::new(), "a@b.c", "hi", "body");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.try_count, 0);
        assert!(task.deleted_at.is_none());
    }

    #[test]
    fn failure_below_max_marks_failed() {
        let mut task = MailTask::new(UserId::new(), "a@b.c", "hi", "body");
        let status = task.record_failure(3);
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(task.try_count, 1);
        assert!(!task.status.is_terminal());
    }

    #[test]
    fn failure_at_max_cancels() {
        // MaxTryCount = 3, try_count = 2: one more failure is terminal.
        let mut task = MailTask::new(UserId::new(), "a@b.c", "hi", "body");
        task.try_count = 2;
        let status = task.record_failure(3);
        assert_eq!(status, TaskStatus::Cancelled);
        assert_eq!(task.try_count, 3);
        assert!(task.status.is_terminal());
    }

    #[test]
    fn success_is_terminal() {
        let mut task = MailTask::new(UserId::new(), "a@b.c", "hi", "body");
        task.mark_success();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.status.is_terminal());
    }

    #[test]
    fn payload_round_trips_field_for_field() {
        let task = MailTask::new(UserId::new(), "a@b.c", "hi", "body")
            .with_scheduled_at(Utc::now())
            .with_sender(sender());
        let decoded = MailTask::from_payload(&task.to_payload().unwrap()).unwrap();
        assert_eq!(task, decoded);
    }

    #[test]
    fn payload_without_sender_decodes() {
        let task = MailTask::new(UserId::new(), "a@b.c", "hi", "body");
        let decoded = MailTask::from_payload(&task.to_payload().unwrap()).unwrap();
        assert_eq!(task, decoded);
        assert!(decoded.sender.is_none());
    }

    proptest! {
        // try_count only grows, and Cancelled is reached exactly when the
        // failure count hits the configured maximum.
        #[test]
        fn try_count_monotonic_and_cancel_boundary(failures in 1u32..10, max in 1u32..6) {
            let mut task = MailTask::new(UserId::new(), "a@b.c", "hi", "body");
            let mut last = task.try_count;
            for i in 1..=failures {
                if task.status == TaskStatus::Cancelled {
                    break;
                }
                let status = task.record_failure(max);
                prop_assert!(task.try_count > last);
                last = task.try_count;
                prop_assert_eq!(task.try_count, i);
                if i >= max {
                    prop_assert_eq!(status, TaskStatus::Cancelled);
                } else {
                    prop_assert_eq!(status, TaskStatus::Failed);
                }
            }
        }
    }
}
