use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{millis, timestamp_column, uuid_column};
use crate::error::{InventoryError, Result};
use crate::models::{BranchId, Reservation, Salutation};

const RESERVATION_COLUMNS: &str =
  "id, branch_id, created_at, notes, salutation, firstname, surname, mail, phone, open";

fn map_reservation(row: &Row<'_>) -> rusqlite::Result<Reservation> {
  let salutation: String = row.get(4)?;
  let salutation = salutation
    .parse::<Salutation>()
    .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err)))?;
  Ok(Reservation {
    id: uuid_column(row, 0)?,
    branch_id: row.get(1)?,
    created_at: timestamp_column(row, 2)?,
    notes: row.get(3)?,
    salutation,
    firstname: row.get(5)?,
    surname: row.get(6)?,
    mail: row.get(7)?,
    phone: row.get(8)?,
    open: row.get(9)?,
  })
}

pub fn find(conn: &Connection, id: Uuid) -> Result<Option<Reservation>> {
  let reservation = conn
    .query_row(
      &format!("SELECT {} FROM reservation WHERE id = ?1", RESERVATION_COLUMNS),
      params![id.to_string()],
      map_reservation,
    )
    .optional()?;
  Ok(reservation)
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Reservation> {
  find(conn, id)?.ok_or_else(|| InventoryError::not_found("reservation", id))
}

pub fn find_by_branch(conn: &Connection, branch: BranchId) -> Result<Vec<Reservation>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM reservation WHERE branch_id = ?1 ORDER BY created_at DESC, rowid DESC",
    RESERVATION_COLUMNS
  ))?;
  let rows = stmt.query_map(params![branch], map_reservation)?;
  let mut reservations = Vec::new();
  for row in rows {
    reservations.push(row?);
  }
  Ok(reservations)
}

pub fn count_open(conn: &Connection, branch: BranchId) -> Result<i64> {
  let count = conn.query_row(
    "SELECT COUNT(*) FROM reservation WHERE branch_id = ?1 AND open = 1",
    params![branch],
    |row| row.get(0),
  )?;
  Ok(count)
}

pub fn insert(conn: &Connection, reservation: &Reservation) -> Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO reservation ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
      RESERVATION_COLUMNS
    ),
    params![
      reservation.id.to_string(),
      reservation.branch_id,
      millis(reservation.created_at),
      reservation.notes,
      reservation.salutation.as_str(),
      reservation.firstname,
      reservation.surname,
      reservation.mail,
      reservation.phone,
      reservation.open,
    ],
  )?;
  Ok(())
}

pub fn save(conn: &Connection, reservation: &Reservation) -> Result<()> {
  let changed = conn.execute(
    "UPDATE reservation SET branch_id = ?2, created_at = ?3, notes = ?4, salutation = ?5, \
     firstname = ?6, surname = ?7, mail = ?8, phone = ?9, open = ?10 WHERE id = ?1",
    params![
      reservation.id.to_string(),
      reservation.branch_id,
      millis(reservation.created_at),
      reservation.notes,
      reservation.salutation.as_str(),
      reservation.firstname,
      reservation.surname,
      reservation.mail,
      reservation.phone,
      reservation.open,
    ],
  )?;
  if changed == 0 {
    return Err(InventoryError::not_found("reservation", reservation.id));
  }
  Ok(())
}

pub fn delete(conn: &Connection, id: Uuid) -> Result<()> {
  let changed = conn.execute("DELETE FROM reservation WHERE id = ?1", params![id.to_string()])?;
  if changed == 0 {
    return Err(InventoryError::not_found("reservation", id));
  }
  Ok(())
}
