use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum InventoryError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("book {0} is already reserved")]
  AlreadyReserved(Uuid),

  #[error("branch {0} already has an open stocktake")]
  SessionAlreadyActive(i64),

  #[error("stocktake {0} is already closed")]
  SessionClosed(i64),

  #[error("validation failed: {0}")]
  ValidationFailed(String),

  #[error("duplicate of book {0}")]
  Conflict(Uuid),

  #[error("store failure: {0}")]
  Store(#[from] rusqlite::Error),

  #[error("store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("cover error: {0}")]
  Cover(String),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("configuration error: {0}")]
  Config(String),
}

impl InventoryError {
  pub(crate) fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
    InventoryError::NotFound(format!("{} {}", kind, id))
  }

  pub(crate) fn forbidden(kind: &str, id: impl std::fmt::Display) -> Self {
    InventoryError::Forbidden(format!("{} {} belongs to another branch", kind, id))
  }
}

pub type Result<T> = std::result::Result<T, InventoryError>;
