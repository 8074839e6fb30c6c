//! Advisory de-duplication run before a book is inserted or updated.

use rusqlite::types::Value;
use rusqlite::Connection;

use crate::error::{InventoryError, Result};
use crate::models::Book;
use crate::repo::books::{self, FieldMatch};

struct DuplicateField {
  column: &'static str,
  nullable: bool,
  value: fn(&Book) -> Value,
}

fn title(book: &Book) -> Value {
  Value::Text(book.title.clone())
}

fn sold(book: &Book) -> Value {
  Value::Integer(book.sold as i64)
}

fn removed(book: &Book) -> Value {
  Value::Integer(book.removed as i64)
}

fn release_year(book: &Book) -> Value {
  Value::Integer(book.release_year as i64)
}

fn format_ref(book: &Book) -> Value {
  Value::Integer(book.format_id)
}

fn optional(value: Option<i64>) -> Value {
  value.map(Value::Integer).unwrap_or(Value::Null)
}

fn branch(book: &Book) -> Value {
  optional(book.branch_id)
}

fn author(book: &Book) -> Value {
  optional(book.author_id)
}

fn genre(book: &Book) -> Value {
  optional(book.genre_id)
}

const DUPLICATE_FIELDS: &[DuplicateField] = &[
  DuplicateField { column: "title", nullable: false, value: title },
  DuplicateField { column: "sold", nullable: false, value: sold },
  DuplicateField { column: "removed", nullable: false, value: removed },
  DuplicateField { column: "release_year", nullable: false, value: release_year },
  DuplicateField { column: "format_id", nullable: false, value: format_ref },
  DuplicateField { column: "branch_id", nullable: true, value: branch },
  DuplicateField { column: "author_id", nullable: true, value: author },
  DuplicateField { column: "genre_id", nullable: true, value: genre },
];

fn terms(candidate: &Book) -> Vec<FieldMatch> {
  DUPLICATE_FIELDS
    .iter()
    .map(|field| FieldMatch {
      column: field.column,
      nullable: field.nullable,
      value: (field.value)(candidate),
    })
    .collect()
}

/// True when both books agree on every duplicate-relevant field, treating
/// two missing references as equal.
pub fn same_identity(a: &Book, b: &Book) -> bool {
  DUPLICATE_FIELDS
    .iter()
    .all(|field| (field.value)(a) == (field.value)(b))
}

/// First stored book sharing the candidate's identity, ignoring the
/// candidate's own row. Rows returned by the store are confirmed with
/// [`same_identity`] so both comparisons stay in step.
pub fn find_duplicate(conn: &Connection, candidate: &Book) -> Result<Option<Book>> {
  let matches = books::find_matching(conn, &terms(candidate))?;
  Ok(
    matches
      .into_iter()
      .find(|book| book.id != candidate.id && same_identity(book, candidate)),
  )
}

pub fn ensure_unique(conn: &Connection, candidate: &Book) -> Result<()> {
  match find_duplicate(conn, candidate)? {
    Some(existing) => {
      log::info!(
        "rejected book {} as duplicate of {} (\"{}\")",
        candidate.id,
        existing.id,
        existing.title
      );
      Err(InventoryError::Conflict(existing.id))
    }
    None => Ok(()),
  }
}
