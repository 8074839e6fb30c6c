use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{millis, opt_timestamp_column, timestamp_column};
use crate::error::{InventoryError, Result};
use crate::models::{BranchId, StocktakeSession};

const SESSION_COLUMNS: &str = "id, branch_id, started_at, ended_at, found, not_found";

fn map_session(row: &Row<'_>) -> rusqlite::Result<StocktakeSession> {
  Ok(StocktakeSession {
    id: row.get(0)?,
    branch_id: row.get(1)?,
    started_at: timestamp_column(row, 2)?,
    ended_at: opt_timestamp_column(row, 3)?,
    found: row.get(4)?,
    not_found: row.get(5)?,
  })
}

pub fn find(conn: &Connection, id: i64) -> Result<Option<StocktakeSession>> {
  let session = conn
    .query_row(
      &format!("SELECT {} FROM inventory WHERE id = ?1", SESSION_COLUMNS),
      params![id],
      map_session,
    )
    .optional()?;
  Ok(session)
}

pub fn get(conn: &Connection, id: i64) -> Result<StocktakeSession> {
  find(conn, id)?.ok_or_else(|| InventoryError::not_found("stocktake", id))
}

pub fn find_open(conn: &Connection, branch: BranchId) -> Result<Option<StocktakeSession>> {
  let session = conn
    .query_row(
      &format!(
        "SELECT {} FROM inventory WHERE branch_id = ?1 AND ended_at IS NULL",
        SESSION_COLUMNS
      ),
      params![branch],
      map_session,
    )
    .optional()?;
  Ok(session)
}

pub fn find_by_branch(conn: &Connection, branch: BranchId) -> Result<Vec<StocktakeSession>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM inventory WHERE branch_id = ?1 ORDER BY started_at DESC, id DESC",
    SESSION_COLUMNS
  ))?;
  let rows = stmt.query_map(params![branch], map_session)?;
  let mut sessions = Vec::new();
  for row in rows {
    sessions.push(row?);
  }
  Ok(sessions)
}

pub fn insert(conn: &Connection, branch: BranchId, started_at: DateTime<Utc>) -> Result<StocktakeSession> {
  conn.execute(
    "INSERT INTO inventory (branch_id, started_at, ended_at, found, not_found) VALUES (?1, ?2, NULL, 0, 0)",
    params![branch, millis(started_at)],
  )?;
  get(conn, conn.last_insert_rowid())
}

/// Adds signed deltas to both counters in a single statement.
pub fn add_to_counters(conn: &Connection, id: i64, found: i64, not_found: i64) -> Result<()> {
  let changed = conn.execute(
    "UPDATE inventory SET found = found + ?2, not_found = not_found + ?3 \
     WHERE id = ?1 AND ended_at IS NULL",
    params![id, found, not_found],
  )?;
  if changed == 0 {
    return Err(InventoryError::SessionClosed(id));
  }
  Ok(())
}

pub fn close(conn: &Connection, id: i64, ended_at: DateTime<Utc>) -> Result<()> {
  let changed = conn.execute(
    "UPDATE inventory SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
    params![id, millis(ended_at)],
  )?;
  if changed == 0 {
    return Err(InventoryError::SessionClosed(id));
  }
  Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
  let changed = conn.execute("DELETE FROM inventory WHERE id = ?1", params![id])?;
  if changed == 0 {
    return Err(InventoryError::not_found("stocktake", id));
  }
  Ok(())
}
