//! Error type for `roster-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] roster_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown {kind}: {value:?}")]
  UnknownValue { kind: &'static str, value: String },
}

impl Error {
  /// The merge-engine error behind this one, if any.
  pub fn as_core(&self) -> Option<&roster_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }

  /// Translate into the engine's taxonomy. Busy and locked databases become
  /// [`roster_core::Error::LockContention`]; uniqueness and foreign-key
  /// failures become [`roster_core::Error::ConstraintViolation`].
  pub fn into_core(self) -> roster_core::Error {
    match self {
      Self::Core(e) => e,
      Self::Json(e) => roster_core::Error::Serialization(e),
      Self::Database(tokio_rusqlite::Error::Rusqlite(e)) => Self::Sqlite(e).into_core(),
      Self::Sqlite(e) if is_locked(&e) => roster_core::Error::LockContention,
      Self::Sqlite(e) if is_constraint_violation(&e) => {
        roster_core::Error::ConstraintViolation(e.to_string())
      }
      other => roster_core::Error::Storage(Box::new(other)),
    }
  }
}

fn is_locked(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(err, _)
      if matches!(
        err.code,
        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
      )
  )
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(err, _)
      if err.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
