//! Outbound mail delivery over SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::{debug, instrument};

use mailspool_core::{validate_for_delivery, DomainError, MailTask};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error("failed to build message: {0}")]
    Message(String),
    #[error("smtp send failed: {0}")]
    Send(String),
}

/// Delivers a task's mail to its recipient.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, task: &MailTask) -> Result<(), DeliveryError>;
}

/// SMTP mailer that connects with the per-task sender credentials.
///
/// Each task carries the SMTP identity of the user that enqueued it, so a
/// fresh transport is built per send rather than pooling a single relay.
#[derive(Debug, Default, Clone)]
pub struct SmtpMailer;

impl SmtpMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    async fn send(&self, task: &MailTask) -> Result<(), DeliveryError> {
        validate_for_delivery(task)?;

        let sender = task
            .sender
            .as_ref()
            .ok_or_else(|| DomainError::validation("task has no sender identity"))?;

        let message = Message::builder()
            .from(
                sender
                    .email
                    .parse()
                    .map_err(|e| DeliveryError::Message(format!("sender address: {}", e)))?,
            )
            .to(task
                .recipient_email
                .parse()
                .map_err(|e| DeliveryError::Message(format!("recipient address: {}", e)))?)
            .subject(task.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(task.body.clone())
            .map_err(|e| DeliveryError::Message(e.to_string()))?;

        let host = sender.smtp_host.clone();
        let port = sender.smtp_port;
        let credentials =
            Credentials::new(sender.smtp_username.clone(), sender.smtp_password.clone());

        // lettre's sync transport blocks on the socket; keep it off the
        // async runtime threads.
        let result = tokio::task::spawn_blocking(move || {
            let transport = SmtpTransport::starttls_relay(&host)
                .map_err(|e| DeliveryError::Send(e.to_string()))?
                .port(port)
                .credentials(credentials)
                .build();
            transport
                .send(&message)
                .map_err(|e| DeliveryError::Send(e.to_string()))
        })
        .await
        .map_err(|e| DeliveryError::Send(format!("send task panicked: {}", e)))??;

        debug!(code = %result.code(), "smtp accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailspool_core::{SenderIdentity, UserId};

    fn sender() -> SenderIdentity {
        SenderIdentity {
            email: "ops@example.com".into(),
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            smtp_username: "ops".into(),
            smtp_password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn rejects_task_without_sender() {
        let task = MailTask::new(UserId::new(), "to@example.com", "hi", "body");
        let err = SmtpMailer::new().send(&task).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Invalid(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_recipient_address() {
        let task =
            MailTask::new(UserId::new(), "not-an-address", "hi", "body").with_sender(sender());
        let err = SmtpMailer::new().send(&task).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Message(_)));
    }
}
