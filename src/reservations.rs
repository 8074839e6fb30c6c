use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{InventoryError, Result};
use crate::lifecycle;
use crate::models::{Book, BranchId, Reservation, ReservationForm, ReservationUpdateForm};
use crate::repo::{books, reservations};

/// Why a candidate from the create list was left out.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
  InvalidId,
  NotFound,
  Sold,
  Removed,
  AlreadyReserved,
  OtherBranch,
  StoreFailure,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedCandidate {
  pub candidate: String,
  pub reason: SkipReason,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReservationDetails {
  pub reservation: Reservation,
  pub books: Vec<Book>,
}

/// Result of a create: the reservation, the books it claimed, and the
/// candidates that were passed over.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReservationReceipt {
  pub reservation: Reservation,
  pub books: Vec<Book>,
  pub skipped: Vec<SkippedCandidate>,
}

/// Splits the raw comma-separated list, dropping blank tokens and repeats.
pub fn parse_candidates(raw: &str) -> Vec<String> {
  let mut seen = HashSet::new();
  raw
    .split(',')
    .map(str::trim)
    .filter(|token| !token.is_empty())
    .filter(|token| seen.insert(token.to_string()))
    .map(|token| token.to_string())
    .collect()
}

fn ineligibility(book: &Book, branch: BranchId) -> Option<SkipReason> {
  if !book.is_accessible_by(branch) {
    Some(SkipReason::OtherBranch)
  } else if book.sold {
    Some(SkipReason::Sold)
  } else if book.removed {
    Some(SkipReason::Removed)
  } else if book.reserved {
    Some(SkipReason::AlreadyReserved)
  } else {
    None
  }
}

fn owned(reservation: Reservation, branch: BranchId) -> Result<Reservation> {
  if reservation.branch_id == branch {
    Ok(reservation)
  } else {
    Err(InventoryError::forbidden("reservation", reservation.id))
  }
}

#[derive(Clone)]
pub struct ReservationManager {
  store: Arc<Store>,
}

impl ReservationManager {
  pub fn new(store: Arc<Store>) -> Self {
    ReservationManager { store }
  }

  /// Creates a reservation and claims every eligible candidate book.
  ///
  /// Contact fields are validated before anything is written. Candidates
  /// that are unknown, unavailable or fail to persist are skipped and
  /// reported; they never abort the reservation itself.
  pub fn create(&self, branch: BranchId, form: ReservationForm) -> Result<ReservationReceipt> {
    let customer = form.customer.validate()?;
    let now = Utc::now();
    let reservation = Reservation {
      id: Uuid::new_v4(),
      branch_id: branch,
      created_at: now,
      notes: customer.notes,
      salutation: customer.salutation,
      firstname: customer.firstname,
      surname: customer.surname,
      mail: customer.mail,
      phone: customer.phone,
      open: true,
    };
    let candidates = parse_candidates(&form.books);

    let receipt = self.store.atomic(|tx| {
      reservations::insert(tx, &reservation)?;
      let mut claimed = Vec::new();
      let mut skipped = Vec::new();

      for candidate in candidates {
        let id = match Uuid::parse_str(&candidate) {
          Ok(id) => id,
          Err(_) => {
            skipped.push(SkippedCandidate {
              candidate,
              reason: SkipReason::InvalidId,
            });
            continue;
          }
        };
        let mut book = match books::find(tx, id)? {
          Some(book) => book,
          None => {
            skipped.push(SkippedCandidate {
              candidate,
              reason: SkipReason::NotFound,
            });
            continue;
          }
        };
        if let Some(reason) = ineligibility(&book, branch) {
          skipped.push(SkippedCandidate { candidate, reason });
          continue;
        }
        if lifecycle::reserve(&mut book, reservation.id, now).is_err() {
          skipped.push(SkippedCandidate {
            candidate,
            reason: SkipReason::AlreadyReserved,
          });
          continue;
        }

        let savepoint = tx.savepoint()?;
        match books::save(&savepoint, &book) {
          Ok(()) => {
            savepoint.commit()?;
            claimed.push(book);
          }
          Err(err) => {
            log::warn!("could not reserve book {} for {}: {}", id, reservation.id, err);
            skipped.push(SkippedCandidate {
              candidate,
              reason: SkipReason::StoreFailure,
            });
          }
        }
      }

      Ok(ReservationReceipt {
        reservation: reservation.clone(),
        books: claimed,
        skipped,
      })
    })?;

    for skip in &receipt.skipped {
      log::warn!(
        "reservation {} skipped candidate {} ({:?})",
        receipt.reservation.id,
        skip.candidate,
        skip.reason
      );
    }
    log::info!(
      "reservation {} created for branch {} with {} book(s)",
      receipt.reservation.id,
      branch,
      receipt.books.len()
    );
    Ok(receipt)
  }

  /// Updates contact details, notes and the open flag. Book membership is
  /// left as it is.
  pub fn update(&self, branch: BranchId, id: Uuid, form: ReservationUpdateForm) -> Result<Reservation> {
    let customer = form.customer.validate()?;
    self.store.atomic(|tx| {
      let mut reservation = owned(reservations::get(tx, id)?, branch)?;
      reservation.notes = customer.notes;
      reservation.salutation = customer.salutation;
      reservation.firstname = customer.firstname;
      reservation.surname = customer.surname;
      reservation.mail = customer.mail;
      reservation.phone = customer.phone;
      reservation.open = form.open;
      reservations::save(tx, &reservation)?;
      Ok(reservation)
    })
  }

  /// Releases every member book, then deletes the reservation, all in one
  /// unit of work. Any failure leaves both untouched.
  pub fn delete(&self, branch: BranchId, id: Uuid) -> Result<usize> {
    let released = self.store.atomic(|tx| {
      owned(reservations::get(tx, id)?, branch)?;
      let members = books::find_by_reservation(tx, id)?;
      for mut book in members.iter().cloned() {
        lifecycle::release(&mut book);
        books::save(tx, &book)?;
      }
      reservations::delete(tx, id)?;
      Ok(members.len())
    })?;
    log::info!("reservation {} deleted, {} book(s) released", id, released);
    Ok(released)
  }

  pub fn find(&self, branch: BranchId, id: Uuid) -> Result<ReservationDetails> {
    self.store.read(|conn| {
      let reservation = owned(reservations::get(conn, id)?, branch)?;
      let books = books::find_by_reservation(conn, id)?;
      Ok(ReservationDetails { reservation, books })
    })
  }

  /// All reservations of a branch, newest first.
  pub fn list(&self, branch: BranchId) -> Result<Vec<ReservationDetails>> {
    self.store.read(|conn| {
      let mut details = Vec::new();
      for reservation in reservations::find_by_branch(conn, branch)? {
        let books = books::find_by_reservation(conn, reservation.id)?;
        details.push(ReservationDetails { reservation, books });
      }
      Ok(details)
    })
  }

  pub fn open_count(&self, branch: BranchId) -> Result<i64> {
    self.store.read(|conn| reservations::count_open(conn, branch))
  }
}
