//! Error types for `roster-core`.

use thiserror::Error;

use crate::contact::ContactId;

#[derive(Debug, Error)]
pub enum Error {
  /// Merge source and target are the same record. Callers treat this as an
  /// idempotent success.
  #[error("contact {0} cannot be merged with itself")]
  SameContact(ContactId),

  /// A contact could not be locked within the configured wait.
  #[error("timed out waiting for a contact lock")]
  LockContention,

  #[error("constraint violation: {0}")]
  ConstraintViolation(String),

  #[error("contact not found: {0}")]
  NotFound(ContactId),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Conditions the API layer reports as success rather than failure.
  pub fn is_benign(&self) -> bool { matches!(self, Self::SameContact(_)) }

  /// Conditions where retrying the whole request may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::LockContention)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
