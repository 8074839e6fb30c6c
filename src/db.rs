use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{InventoryError, Result};

const MIGRATION_CORE_SQL: &str = include_str!("../migrations/0000_core.sql");
const MIGRATION_OPEN_INVENTORY_SQL: &str = include_str!("../migrations/0001_open_inventory_index.sql");

const MIGRATIONS: &[(&str, &str)] = &[
  ("0000_core", MIGRATION_CORE_SQL),
  ("0001_open_inventory_index", MIGRATION_OPEN_INVENTORY_SQL),
];

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Transactional SQLite store shared by every manager.
///
/// All writes go through [`Store::atomic`], which takes the database write
/// lock up front (`BEGIN IMMEDIATE`). Every row touched by one operation is
/// committed together or not at all.
pub struct Store {
  conn: Mutex<Connection>,
}

impl Store {
  pub fn open(path: &Path) -> Result<Self> {
    Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT_MS)
  }

  pub fn open_with_timeout(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() && !parent.exists() {
        std::fs::create_dir_all(parent)?;
      }
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(
      "CREATE TABLE IF NOT EXISTS schema_migrations (
        id TEXT PRIMARY KEY NOT NULL,
        applied_at INTEGER NOT NULL
      );",
    )?;
    for (id, sql) in MIGRATIONS {
      apply_migration(&conn, id, sql)?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(Store {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| InventoryError::StoreUnavailable("connection lock poisoned".to_string()))
  }

  /// Runs read-only queries against the store.
  pub fn read<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&Connection) -> Result<T>,
  {
    let conn = self.lock()?;
    f(&conn)
  }

  /// Runs `f` as one commit-or-abort unit. Returning an error from `f`
  /// rolls back every write it made.
  pub fn atomic<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Transaction<'_>) -> Result<T>,
  {
    let mut conn = self.lock()?;
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&mut tx)?;
    tx.commit()?;
    Ok(value)
  }
}

fn apply_migration(conn: &Connection, id: &str, sql: &str) -> Result<()> {
  let existing: Option<String> = conn
    .query_row(
      "SELECT id FROM schema_migrations WHERE id = ?1",
      params![id],
      |row| row.get(0),
    )
    .optional()?;
  if existing.is_some() {
    return Ok(());
  }
  conn.execute_batch(sql)?;
  conn.execute(
    "INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
    params![id, Utc::now().timestamp_millis()],
  )?;
  log::info!("applied migration {}", id);
  Ok(())
}

pub(crate) fn millis(value: DateTime<Utc>) -> i64 {
  value.timestamp_millis()
}

pub(crate) fn opt_millis(value: Option<DateTime<Utc>>) -> Option<i64> {
  value.map(millis)
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: i64 = row.get(idx)?;
  DateTime::from_timestamp_millis(raw).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, raw))
}

pub(crate) fn opt_timestamp_column(
  row: &Row<'_>,
  idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let raw: Option<i64> = row.get(idx)?;
  match raw {
    Some(value) => DateTime::from_timestamp_millis(value)
      .map(Some)
      .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, value)),
    None => Ok(None),
  }
}

pub(crate) fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
  let raw: String = row.get(idx)?;
  Uuid::parse_str(&raw)
    .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn opt_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
  let raw: Option<String> = row.get(idx)?;
  match raw {
    Some(value) => Uuid::parse_str(&value)
      .map(Some)
      .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))),
    None => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn migrations_apply_once() {
    let store = Store::open_in_memory().expect("store");
    let applied: i64 = store
      .read(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))?)
      })
      .expect("count");
    assert_eq!(applied, MIGRATIONS.len() as i64);

    store
      .read(|conn| {
        for (id, sql) in MIGRATIONS {
          apply_migration(conn, id, sql)?;
        }
        Ok(())
      })
      .expect("re-apply is a no-op");
  }

  #[test]
  fn failed_unit_of_work_rolls_back() {
    let store = Store::open_in_memory().expect("store");
    let result: Result<()> = store.atomic(|tx| {
      tx.execute(
        "INSERT INTO branch (name, currency, public) VALUES ('Mitte', 'EUR', 0)",
        [],
      )?;
      Err(InventoryError::ValidationFailed("abort".to_string()))
    });
    assert!(result.is_err());

    let branches: i64 = store
      .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM branch", [], |row| row.get(0))?))
      .expect("count");
    assert_eq!(branches, 0);
  }

  #[test]
  fn open_creates_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("stock.db");
    let store = Store::open(&path).expect("store");
    store
      .atomic(|tx| {
        tx.execute("INSERT INTO branch (name) VALUES ('Nord')", [])?;
        Ok(())
      })
      .expect("insert");
    drop(store);

    let reopened = Store::open(&path).expect("reopen");
    let name: String = reopened
      .read(|conn| Ok(conn.query_row("SELECT name FROM branch", [], |row| row.get(0))?))
      .expect("read");
    assert_eq!(name, "Nord");
  }
}
