//! State transitions for a single book.
//!
//! Nothing here touches the store. Callers load a book, apply one of these
//! transitions and persist the result inside the same unit of work. Every
//! transition keeps the timestamp pairing intact: `sold` iff `sold_on`,
//! `removed` iff `removed_on`, and `reserved` iff both `reserved_at` and
//! `reservation_id` are set.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{InventoryError, Result};
use crate::models::{Book, InventoryFlag};

/// Toggles `sold`. Selling drops any reservation claim.
pub fn mark_sold(book: &mut Book, now: DateTime<Utc>) {
  if book.sold {
    book.sold = false;
    book.sold_on = None;
  } else {
    book.sold = true;
    book.sold_on = Some(now);
    release(book);
  }
}

/// Toggles `removed`. Removing drops any reservation claim.
pub fn mark_removed(book: &mut Book, now: DateTime<Utc>) {
  if book.removed {
    book.removed = false;
    book.removed_on = None;
  } else {
    book.removed = true;
    book.removed_on = Some(now);
    release(book);
  }
}

/// Moves `sold` to `target`, leaving the book untouched when it already is.
pub fn set_sold(book: &mut Book, target: bool, now: DateTime<Utc>) {
  if book.sold != target {
    mark_sold(book, now);
  }
}

pub fn set_removed(book: &mut Book, target: bool, now: DateTime<Utc>) {
  if book.removed != target {
    mark_removed(book, now);
  }
}

pub fn reserve(book: &mut Book, reservation_id: Uuid, now: DateTime<Utc>) -> Result<()> {
  if book.reserved {
    return Err(InventoryError::AlreadyReserved(book.id));
  }
  book.reserved = true;
  book.reserved_at = Some(now);
  book.reservation_id = Some(reservation_id);
  Ok(())
}

pub fn release(book: &mut Book) {
  book.reserved = false;
  book.reserved_at = None;
  book.reservation_id = None;
}

/// Signed adjustment for a stocktake's counters.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CounterDelta {
  pub found: i64,
  pub not_found: i64,
}

impl CounterDelta {
  fn shift(&mut self, flag: InventoryFlag, by: i64) {
    match flag {
      InventoryFlag::Found => self.found += by,
      InventoryFlag::NotFound => self.not_found += by,
      InventoryFlag::Unset => {}
    }
  }

  pub fn is_zero(&self) -> bool {
    self.found == 0 && self.not_found == 0
  }
}

/// Flips the inventory flag toward `found` (or not-found).
///
/// Hitting the flag the book already carries resets it to unset and takes
/// one off that counter. Otherwise the flag moves to the target and only
/// the target counter gains one.
pub fn apply_inventory_flag(book: &mut Book, found: bool) -> CounterDelta {
  let target = if found {
    InventoryFlag::Found
  } else {
    InventoryFlag::NotFound
  };
  let mut delta = CounterDelta::default();
  if book.inventory == target {
    book.inventory = InventoryFlag::Unset;
    delta.shift(target, -1);
  } else {
    book.inventory = target;
    delta.shift(target, 1);
  }
  delta
}
