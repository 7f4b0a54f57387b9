//! User account and sender identity.
//!
//! The core never mutates user records; it only reads them to resolve the
//! outbound identity and SMTP credentials for a delivery attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// A user account owning mail tasks.
///
/// Owned by the user storage collaborator; consumed read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// The identity a delivery attempt sends as.
    pub fn sender_identity(&self) -> SenderIdentity {
        SenderIdentity {
            email: self.email.clone(),
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username.clone(),
            smtp_password: self.smtp_password.clone(),
        }
    }
}

/// Outbound identity and transport credentials carried on an enriched task.
///
/// The enqueue path resolves this from the owning [`UserAccount`] before
/// publishing, so workers never need a user lookup of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
}
