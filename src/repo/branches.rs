use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{InventoryError, Result};
use crate::models::{Branch, BranchId, Currency};

fn map_branch(row: &Row<'_>) -> rusqlite::Result<Branch> {
  let code: String = row.get(2)?;
  let currency = Currency::from_code(&code).ok_or_else(|| {
    rusqlite::Error::FromSqlConversionFailure(
      2,
      Type::Text,
      format!("unknown currency {}", code).into(),
    )
  })?;
  Ok(Branch {
    id: row.get(0)?,
    name: row.get(1)?,
    currency,
    public: row.get(3)?,
  })
}

pub fn insert(conn: &Connection, name: &str, currency: Currency, public: bool) -> Result<Branch> {
  let name = name.trim();
  if name.is_empty() || name.chars().count() > 255 {
    return Err(InventoryError::ValidationFailed(
      "branch name must be between 1 and 255 characters".to_string(),
    ));
  }
  conn.execute(
    "INSERT INTO branch (name, currency, public) VALUES (?1, ?2, ?3)",
    params![name, currency.code(), public],
  )?;
  Ok(Branch {
    id: conn.last_insert_rowid(),
    name: name.to_string(),
    currency,
    public,
  })
}

pub fn find(conn: &Connection, id: BranchId) -> Result<Option<Branch>> {
  let branch = conn
    .query_row(
      "SELECT id, name, currency, public FROM branch WHERE id = ?1",
      params![id],
      map_branch,
    )
    .optional()?;
  Ok(branch)
}

pub fn get(conn: &Connection, id: BranchId) -> Result<Branch> {
  find(conn, id)?.ok_or_else(|| InventoryError::not_found("branch", id))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Store;

  #[test]
  fn inserts_and_finds_branch() {
    let store = Store::open_in_memory().expect("store");
    let created = store
      .atomic(|tx| insert(tx, " Hafen ", Currency::USD, true))
      .expect("insert");
    let loaded = store.read(|conn| get(conn, created.id)).expect("get");
    assert_eq!(loaded.name, "Hafen");
    assert_eq!(loaded.currency, Currency::USD);
    assert!(loaded.public);
  }

  #[test]
  fn rejects_blank_name() {
    let store = Store::open_in_memory().expect("store");
    assert!(matches!(
      store.atomic(|tx| insert(tx, "  ", Currency::EUR, false)),
      Err(InventoryError::ValidationFailed(_))
    ));
  }
}
