use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{millis, opt_millis, opt_timestamp_column, opt_uuid_column, timestamp_column, uuid_column};
use crate::error::{InventoryError, Result};
use crate::models::{Book, BranchId, InventoryFlag};

const BOOK_COLUMNS: &str = "id, branch_id, added, title, subtitle, short_description, author_id, \
  genre_id, format_id, cond_id, price, release_year, recommendation, duplicate, sold, sold_on, \
  removed, removed_on, reserved, reserved_at, reservation_id, inventory";

/// One equality term of a predicate query. Nullable terms compare with
/// `IS`, so two NULLs match.
#[derive(Debug, Clone)]
pub struct FieldMatch {
  pub column: &'static str,
  pub nullable: bool,
  pub value: Value,
}

fn map_book(row: &Row<'_>) -> rusqlite::Result<Book> {
  Ok(Book {
    id: uuid_column(row, 0)?,
    branch_id: row.get(1)?,
    added: timestamp_column(row, 2)?,
    title: row.get(3)?,
    subtitle: row.get(4)?,
    short_description: row.get(5)?,
    author_id: row.get(6)?,
    genre_id: row.get(7)?,
    format_id: row.get(8)?,
    condition_id: row.get(9)?,
    price: row.get(10)?,
    release_year: row.get(11)?,
    tags: Vec::new(),
    recommendation: row.get(12)?,
    duplicate: row.get(13)?,
    sold: row.get(14)?,
    sold_on: opt_timestamp_column(row, 15)?,
    removed: row.get(16)?,
    removed_on: opt_timestamp_column(row, 17)?,
    reserved: row.get(18)?,
    reserved_at: opt_timestamp_column(row, 19)?,
    reservation_id: opt_uuid_column(row, 20)?,
    inventory: row.get::<_, InventoryFlag>(21)?,
  })
}

fn load_tags(conn: &Connection, book_id: Uuid) -> Result<Vec<i64>> {
  let mut stmt = conn.prepare("SELECT tag_id FROM book_tag WHERE book_id = ?1 ORDER BY tag_id")?;
  let rows = stmt.query_map(params![book_id.to_string()], |row| row.get(0))?;
  let mut tags = Vec::new();
  for row in rows {
    tags.push(row?);
  }
  Ok(tags)
}

fn store_tags(conn: &Connection, book: &Book) -> Result<()> {
  let id = book.id.to_string();
  conn.execute("DELETE FROM book_tag WHERE book_id = ?1", params![id])?;
  for tag in &book.tags {
    conn.execute(
      "INSERT OR IGNORE INTO book_tag (book_id, tag_id) VALUES (?1, ?2)",
      params![id, tag],
    )?;
  }
  Ok(())
}

fn query_books(conn: &Connection, sql: &str, values: Vec<Value>) -> Result<Vec<Book>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt.query_map(params_from_iter(values), map_book)?;
  let mut books = Vec::new();
  for row in rows {
    books.push(row?);
  }
  for book in &mut books {
    book.tags = load_tags(conn, book.id)?;
  }
  Ok(books)
}

pub fn find(conn: &Connection, id: Uuid) -> Result<Option<Book>> {
  let book = conn
    .query_row(
      &format!("SELECT {} FROM book WHERE id = ?1", BOOK_COLUMNS),
      params![id.to_string()],
      map_book,
    )
    .optional()?;
  match book {
    Some(mut book) => {
      book.tags = load_tags(conn, book.id)?;
      Ok(Some(book))
    }
    None => Ok(None),
  }
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Book> {
  find(conn, id)?.ok_or_else(|| InventoryError::not_found("book", id))
}

pub fn insert(conn: &Connection, book: &Book) -> Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO book ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
       ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
      BOOK_COLUMNS
    ),
    params![
      book.id.to_string(),
      book.branch_id,
      millis(book.added),
      book.title,
      book.subtitle,
      book.short_description,
      book.author_id,
      book.genre_id,
      book.format_id,
      book.condition_id,
      book.price,
      book.release_year,
      book.recommendation,
      book.duplicate,
      book.sold,
      opt_millis(book.sold_on),
      book.removed,
      opt_millis(book.removed_on),
      book.reserved,
      opt_millis(book.reserved_at),
      book.reservation_id.map(|id| id.to_string()),
      book.inventory,
    ],
  )?;
  store_tags(conn, book)
}

/// Writes every column of an existing book, tags included.
pub fn save(conn: &Connection, book: &Book) -> Result<()> {
  let changed = conn.execute(
    "UPDATE book SET branch_id = ?2, added = ?3, title = ?4, subtitle = ?5, \
     short_description = ?6, author_id = ?7, genre_id = ?8, format_id = ?9, cond_id = ?10, \
     price = ?11, release_year = ?12, recommendation = ?13, duplicate = ?14, sold = ?15, \
     sold_on = ?16, removed = ?17, removed_on = ?18, reserved = ?19, reserved_at = ?20, \
     reservation_id = ?21, inventory = ?22 WHERE id = ?1",
    params![
      book.id.to_string(),
      book.branch_id,
      millis(book.added),
      book.title,
      book.subtitle,
      book.short_description,
      book.author_id,
      book.genre_id,
      book.format_id,
      book.condition_id,
      book.price,
      book.release_year,
      book.recommendation,
      book.duplicate,
      book.sold,
      opt_millis(book.sold_on),
      book.removed,
      opt_millis(book.removed_on),
      book.reserved,
      opt_millis(book.reserved_at),
      book.reservation_id.map(|id| id.to_string()),
      book.inventory,
    ],
  )?;
  if changed == 0 {
    return Err(InventoryError::not_found("book", book.id));
  }
  store_tags(conn, book)
}

pub fn delete(conn: &Connection, id: Uuid) -> Result<()> {
  let changed = conn.execute("DELETE FROM book WHERE id = ?1", params![id.to_string()])?;
  if changed == 0 {
    return Err(InventoryError::not_found("book", id));
  }
  Ok(())
}

/// Books matching every term, in insertion order.
pub fn find_matching(conn: &Connection, terms: &[FieldMatch]) -> Result<Vec<Book>> {
  let mut clauses = Vec::with_capacity(terms.len());
  let mut values = Vec::with_capacity(terms.len());
  for (idx, term) in terms.iter().enumerate() {
    let op = if term.nullable { "IS" } else { "=" };
    clauses.push(format!("{} {} ?{}", term.column, op, idx + 1));
    values.push(term.value.clone());
  }
  let filter = if clauses.is_empty() {
    "1 = 1".to_string()
  } else {
    clauses.join(" AND ")
  };
  let sql = format!(
    "SELECT {} FROM book WHERE {} ORDER BY added, rowid",
    BOOK_COLUMNS, filter
  );
  query_books(conn, &sql, values)
}

pub fn find_by_branch(conn: &Connection, branch: BranchId) -> Result<Vec<Book>> {
  query_books(
    conn,
    &format!(
      "SELECT {} FROM book WHERE branch_id = ?1 ORDER BY added DESC, rowid DESC",
      BOOK_COLUMNS
    ),
    vec![Value::Integer(branch)],
  )
}

pub fn find_by_reservation(conn: &Connection, reservation_id: Uuid) -> Result<Vec<Book>> {
  query_books(
    conn,
    &format!(
      "SELECT {} FROM book WHERE reservation_id = ?1 ORDER BY added, rowid",
      BOOK_COLUMNS
    ),
    vec![Value::Text(reservation_id.to_string())],
  )
}

/// Sold or removed books whose timestamp is strictly before `cutoff_millis`.
pub fn find_expired(conn: &Connection, cutoff_millis: i64) -> Result<Vec<Book>> {
  query_books(
    conn,
    &format!(
      "SELECT {} FROM book WHERE (sold = 1 AND sold_on < ?1) OR (removed = 1 AND removed_on < ?1) \
       ORDER BY added, rowid",
      BOOK_COLUMNS
    ),
    vec![Value::Integer(cutoff_millis)],
  )
}

pub fn find_sold_or_removed_in_branch(conn: &Connection, branch: BranchId) -> Result<Vec<Book>> {
  query_books(
    conn,
    &format!(
      "SELECT {} FROM book WHERE branch_id = ?1 AND (sold = 1 OR removed = 1) ORDER BY added, rowid",
      BOOK_COLUMNS
    ),
    vec![Value::Integer(branch)],
  )
}

pub fn reset_inventory_flags(conn: &Connection, branch: BranchId) -> Result<usize> {
  let changed = conn.execute(
    "UPDATE book SET inventory = NULL WHERE branch_id = ?1 AND inventory IS NOT NULL",
    params![branch],
  )?;
  Ok(changed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Store;
  use crate::models::BookDraft;
  use chrono::{Duration, Utc};

  fn seed_branch(store: &Store) -> BranchId {
    store
      .atomic(|tx| {
        tx.execute("INSERT INTO branch (name) VALUES ('Altstadt')", [])?;
        Ok(tx.last_insert_rowid())
      })
      .expect("branch")
  }

  fn book(branch: Option<BranchId>, title: &str) -> Book {
    Book::from_draft(
      BookDraft {
        branch_id: branch,
        title: title.to_string(),
        format_id: 1,
        release_year: 2001,
        tags: vec![5, 2],
        ..BookDraft::default()
      },
      Utc::now(),
    )
  }

  #[test]
  fn stores_and_loads_full_record() {
    let store = Store::open_in_memory().expect("store");
    let branch = seed_branch(&store);
    let mut original = book(Some(branch), "Stiller");
    original.inventory = InventoryFlag::NotFound;

    store.atomic(|tx| insert(tx, &original)).expect("insert");
    let loaded = store.read(|conn| get(conn, original.id)).expect("get");

    assert_eq!(loaded.title, "Stiller");
    assert_eq!(loaded.tags, vec![2, 5]);
    assert_eq!(loaded.inventory, InventoryFlag::NotFound);
    assert_eq!(loaded.added.timestamp_millis(), original.added.timestamp_millis());
  }

  #[test]
  fn save_and_delete_report_missing_rows() {
    let store = Store::open_in_memory().expect("store");
    let ghost = book(None, "Ghost");
    assert!(matches!(
      store.atomic(|tx| save(tx, &ghost)),
      Err(InventoryError::NotFound(_))
    ));
    assert!(matches!(
      store.atomic(|tx| delete(tx, ghost.id)),
      Err(InventoryError::NotFound(_))
    ));
  }

  #[test]
  fn nullable_terms_match_null() {
    let store = Store::open_in_memory().expect("store");
    let unassigned = book(None, "Homo faber");
    store.atomic(|tx| insert(tx, &unassigned)).expect("insert");

    let terms = vec![
      FieldMatch {
        column: "title",
        nullable: false,
        value: Value::Text("Homo faber".to_string()),
      },
      FieldMatch {
        column: "branch_id",
        nullable: true,
        value: Value::Null,
      },
    ];
    let found = store.read(|conn| find_matching(conn, &terms)).expect("query");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, unassigned.id);
  }

  #[test]
  fn expired_query_uses_strict_cutoff() {
    let store = Store::open_in_memory().expect("store");
    let now = Utc::now();
    let mut old = book(None, "Old");
    old.sold = true;
    old.sold_on = Some(now - Duration::days(30));
    let mut fresh = book(None, "Fresh");
    fresh.removed = true;
    fresh.removed_on = Some(now - Duration::days(2));
    store
      .atomic(|tx| {
        insert(tx, &old)?;
        insert(tx, &fresh)
      })
      .expect("insert");

    let cutoff = (now - Duration::days(28)).timestamp_millis();
    let expired = store.read(|conn| find_expired(conn, cutoff)).expect("query");
    assert_eq!(expired.iter().map(|b| b.id).collect::<Vec<_>>(), vec![old.id]);
  }
}
