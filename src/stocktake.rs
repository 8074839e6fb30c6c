use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{InventoryError, Result};
use crate::lifecycle::{self, CounterDelta};
use crate::models::{Book, BranchId, StocktakeSession};
use crate::repo::{books, stocktakes};

/// Outcome of one found/not-found toggle.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
  pub book: Book,
  pub session: StocktakeSession,
  pub delta: CounterDelta,
}

/// Owns the one-open-session-per-branch rule and the session counters.
#[derive(Clone)]
pub struct StocktakeManager {
  store: Arc<Store>,
}

fn owned(session: StocktakeSession, branch: BranchId) -> Result<StocktakeSession> {
  if session.branch_id == branch {
    Ok(session)
  } else {
    Err(InventoryError::forbidden("stocktake", session.id))
  }
}

impl StocktakeManager {
  pub fn new(store: Arc<Store>) -> Self {
    StocktakeManager { store }
  }

  /// Starts a session for `branch`. Every book of the branch begins the
  /// count unset.
  pub fn open(&self, branch: BranchId) -> Result<StocktakeSession> {
    let now = Utc::now();
    let (session, reset) = self.store.atomic(|tx| {
      if stocktakes::find_open(tx, branch)?.is_some() {
        return Err(InventoryError::SessionAlreadyActive(branch));
      }
      let reset = books::reset_inventory_flags(tx, branch)?;
      let session = stocktakes::insert(tx, branch, now)?;
      Ok((session, reset))
    })?;
    log::info!(
      "stocktake {} opened for branch {} ({} flags reset)",
      session.id,
      branch,
      reset
    );
    Ok(session)
  }

  /// Ends the session. Counters are frozen afterwards.
  pub fn close(
    &self,
    branch: BranchId,
    session_id: i64,
    ended_at: Option<DateTime<Utc>>,
  ) -> Result<StocktakeSession> {
    let ended_at = ended_at.unwrap_or_else(Utc::now);
    let session = self.store.atomic(|tx| {
      let session = owned(stocktakes::get(tx, session_id)?, branch)?;
      if !session.is_open() {
        return Err(InventoryError::SessionClosed(session.id));
      }
      if ended_at < session.started_at {
        return Err(InventoryError::ValidationFailed(
          "a stocktake cannot end before it started".to_string(),
        ));
      }
      stocktakes::close(tx, session.id, ended_at)?;
      stocktakes::get(tx, session.id)
    })?;
    log::info!(
      "stocktake {} closed for branch {} (found {}, not found {})",
      session.id,
      branch,
      session.found,
      session.not_found
    );
    Ok(session)
  }

  pub fn toggle_found(&self, branch: BranchId, session_id: i64, book_id: Uuid) -> Result<ToggleOutcome> {
    self.toggle(branch, session_id, book_id, true)
  }

  pub fn toggle_not_found(
    &self,
    branch: BranchId,
    session_id: i64,
    book_id: Uuid,
  ) -> Result<ToggleOutcome> {
    self.toggle(branch, session_id, book_id, false)
  }

  fn toggle(&self, branch: BranchId, session_id: i64, book_id: Uuid, found: bool) -> Result<ToggleOutcome> {
    self.store.atomic(|tx| {
      let session = owned(stocktakes::get(tx, session_id)?, branch)?;
      if !session.is_open() {
        return Err(InventoryError::SessionClosed(session.id));
      }
      let mut book = books::get(tx, book_id)?;
      if !book.is_owned_by(session.branch_id) {
        return Err(InventoryError::forbidden("book", book.id));
      }
      let delta = lifecycle::apply_inventory_flag(&mut book, found);
      books::save(tx, &book)?;
      if !delta.is_zero() {
        stocktakes::add_to_counters(tx, session.id, delta.found, delta.not_found)?;
      }
      let session = stocktakes::get(tx, session.id)?;
      Ok(ToggleOutcome {
        book,
        session,
        delta,
      })
    })
  }

  pub fn find(&self, branch: BranchId, session_id: i64) -> Result<StocktakeSession> {
    let session = self.store.read(|conn| stocktakes::get(conn, session_id))?;
    owned(session, branch)
  }

  pub fn current(&self, branch: BranchId) -> Result<Option<StocktakeSession>> {
    self.store.read(|conn| stocktakes::find_open(conn, branch))
  }

  pub fn list(&self, branch: BranchId) -> Result<Vec<StocktakeSession>> {
    self.store.read(|conn| stocktakes::find_by_branch(conn, branch))
  }

  pub fn delete(&self, branch: BranchId, session_id: i64) -> Result<()> {
    self.store.atomic(|tx| {
      owned(stocktakes::get(tx, session_id)?, branch)?;
      stocktakes::delete(tx, session_id)
    })?;
    log::info!("stocktake {} deleted for branch {}", session_id, branch);
    Ok(())
  }
}
