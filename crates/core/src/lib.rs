//! `mailspool-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the mail task record and its lifecycle state machine, strongly-typed
//! identifiers, the sender identity consumed read-only from the user store,
//! and the delivery-readiness validation rules.

pub mod error;
pub mod id;
pub mod task;
pub mod user;
pub mod validate;

pub use error::{DomainError, DomainResult};
pub use id::{TaskId, UserId};
pub use task::{MailTask, TaskStatus};
pub use user::{SenderIdentity, UserAccount};
pub use validate::validate_for_delivery;
