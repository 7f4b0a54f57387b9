//! Delivery-readiness validation.
//!
//! An explicit, statically-checked rule list over the task and its sender
//! identity, evaluated before a delivery attempt is constructed. Every
//! missing field is reported, not just the first.

use crate::error::{DomainError, DomainResult};
use crate::task::MailTask;

/// A single required-field rule.
pub struct FieldRule {
    /// Field name as reported in the validation error.
    pub name: &'static str,
    /// Returns true when the field is present/usable.
    pub present: fn(&MailTask) -> bool,
}

/// Required fields for constructing a delivery attempt.
pub const DELIVERY_RULES: &[FieldRule] = &[
    FieldRule {
        name: "recipient_email",
        present: |t| !t.recipient_email.is_empty(),
    },
    FieldRule {
        name: "subject",
        present: |t| !t.subject.is_empty(),
    },
    FieldRule {
        name: "body",
        present: |t| !t.body.is_empty(),
    },
    FieldRule {
        name: "sender.email",
        present: |t| t.sender.as_ref().is_some_and(|s| !s.email.is_empty()),
    },
    FieldRule {
        name: "sender.smtp_host",
        present: |t| t.sender.as_ref().is_some_and(|s| !s.smtp_host.is_empty()),
    },
    FieldRule {
        name: "sender.smtp_port",
        present: |t| t.sender.as_ref().is_some_and(|s| s.smtp_port != 0),
    },
    FieldRule {
        name: "sender.smtp_username",
        present: |t| t.sender.as_ref().is_some_and(|s| !s.smtp_username.is_empty()),
    },
    FieldRule {
        name: "sender.smtp_password",
        present: |t| t.sender.as_ref().is_some_and(|s| !s.smtp_password.is_empty()),
    },
];

/// Check a task against [`DELIVERY_RULES`].
pub fn validate_for_delivery(task: &MailTask) -> DomainResult<()> {
    let missing: Vec<&'static str> = DELIVERY_RULES
        .iter()
        .filter(|rule| !(rule.present)(task))
        .map(|rule| rule.name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "missing fields: {}",
            missing.join(", ")
        )))
    }
}
