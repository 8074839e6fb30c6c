use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::covers::CoverStore;
use crate::db::{millis, Store};
use crate::error::{InventoryError, Result};
use crate::models::{Book, BranchId};
use crate::repo::books;

pub const DEFAULT_RETENTION_DAYS: u32 = 28;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoverFailure {
  pub book_id: Uuid,
  pub error: String,
}

/// What a purge removed. Cover cleanup failures are listed but never stop
/// the row deletion.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
  pub deleted: Vec<Uuid>,
  pub cover_failures: Vec<CoverFailure>,
}

/// Removes sold or removed books together with their cover derivatives.
#[derive(Clone)]
pub struct RetentionSweeper {
  store: Arc<Store>,
  covers: Arc<dyn CoverStore>,
}

impl RetentionSweeper {
  pub fn new(store: Arc<Store>, covers: Arc<dyn CoverStore>) -> Self {
    RetentionSweeper { store, covers }
  }

  /// Deletes every book sold or removed more than `cutoff_days` before
  /// `now`.
  pub fn purge(&self, cutoff_days: u32, now: DateTime<Utc>) -> Result<PurgeReport> {
    let cutoff = now
      .checked_sub_signed(Duration::days(i64::from(cutoff_days)))
      .ok_or_else(|| InventoryError::ValidationFailed(format!("cutoff of {} days is out of range", cutoff_days)))?;
    let report = self.sweep(|conn| books::find_expired(conn, millis(cutoff)))?;
    log::info!(
      "purged {} book(s) older than {} days ({} cover failure(s))",
      report.deleted.len(),
      cutoff_days,
      report.cover_failures.len()
    );
    Ok(report)
  }

  /// Deletes every sold or removed book of `branch`, whatever its age.
  pub fn purge_by_branch(&self, branch: BranchId) -> Result<PurgeReport> {
    let report = self.sweep(|conn| books::find_sold_or_removed_in_branch(conn, branch))?;
    log::info!(
      "purged {} sold or removed book(s) from branch {} ({} cover failure(s))",
      report.deleted.len(),
      branch,
      report.cover_failures.len()
    );
    Ok(report)
  }

  /// Cover cleanup runs outside the store lock, before the rows go. Only
  /// books that still qualify when the rows are deleted are removed.
  fn sweep<F>(&self, select: F) -> Result<PurgeReport>
  where
    F: Fn(&rusqlite::Connection) -> Result<Vec<Book>>,
  {
    let ordered: Vec<Uuid> = self
      .store
      .read(|conn| select(conn))?
      .into_iter()
      .map(|book| book.id)
      .collect();
    let candidates: HashSet<Uuid> = ordered.iter().copied().collect();

    let mut report = PurgeReport::default();
    for &id in &ordered {
      if let Err(err) = self.covers.delete(id) {
        log::warn!("cover cleanup failed for purged book {}: {}", id, err);
        report.cover_failures.push(CoverFailure {
          book_id: id,
          error: err.to_string(),
        });
      }
    }

    report.deleted = self.store.atomic(|tx| {
      let mut deleted = Vec::new();
      for book in select(tx)? {
        if candidates.contains(&book.id) {
          books::delete(tx, book.id)?;
          deleted.push(book.id);
        }
      }
      Ok(deleted)
    })?;
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::covers::FsCoverStore;
  use crate::models::{BookDraft, CoverSize, Currency};
  use crate::repo::branches;

  struct BrokenCovers;

  impl CoverStore for BrokenCovers {
    fn put(&self, _: Uuid, _: &[u8]) -> Result<()> {
      Ok(())
    }

    fn delete(&self, _: Uuid) -> Result<()> {
      Err(InventoryError::Cover("disk unplugged".to_string()))
    }

    fn fetch(&self, _: Uuid, _: CoverSize) -> Result<Vec<u8>> {
      Ok(Vec::new())
    }
  }

  fn shelve(store: &Store, branch: Option<BranchId>, title: &str, sold_days_ago: Option<i64>) -> Uuid {
    let now = Utc::now();
    let mut book = Book::from_draft(
      BookDraft {
        branch_id: branch,
        title: title.to_string(),
        format_id: 3,
        release_year: 1965,
        ..BookDraft::default()
      },
      now - Duration::days(60),
    );
    if let Some(days) = sold_days_ago {
      book.sold = true;
      book.sold_on = Some(now - Duration::days(days));
    }
    store.atomic(|tx| books::insert(tx, &book)).expect("insert");
    book.id
  }

  #[test]
  fn purge_respects_cutoff_and_removes_covers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let covers = Arc::new(FsCoverStore::new(dir.path()));
    let old = shelve(&store, None, "Alt", Some(29));
    let recent = shelve(&store, None, "Neu", Some(27));
    let unsold = shelve(&store, None, "Regal", None);
    for id in [old, recent] {
      for size in CoverSize::ALL {
        std::fs::write(covers.path_for(id, size), b"jpeg").expect("cover");
      }
    }

    let sweeper = RetentionSweeper::new(store.clone(), covers.clone());
    let report = sweeper.purge(DEFAULT_RETENTION_DAYS, Utc::now()).expect("purge");

    assert_eq!(report.deleted, vec![old]);
    assert!(report.cover_failures.is_empty());
    for size in CoverSize::ALL {
      assert!(!covers.path_for(old, size).exists());
      assert!(covers.path_for(recent, size).exists());
    }
    store
      .read(|conn| {
        assert!(books::find(conn, old)?.is_none());
        assert!(books::find(conn, recent)?.is_some());
        assert!(books::find(conn, unsold)?.is_some());
        Ok(())
      })
      .expect("read");
  }

  #[test]
  fn cover_failure_is_reported_and_row_still_deleted() {
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let old = shelve(&store, None, "Kaputt", Some(40));

    let sweeper = RetentionSweeper::new(store.clone(), Arc::new(BrokenCovers));
    let report = sweeper.purge(DEFAULT_RETENTION_DAYS, Utc::now()).expect("purge");

    assert_eq!(report.deleted, vec![old]);
    assert_eq!(report.cover_failures.len(), 1);
    assert_eq!(report.cover_failures[0].book_id, old);
    assert!(store.read(|conn| books::find(conn, old)).expect("read").is_none());
  }

  #[test]
  fn purge_by_branch_ignores_age_and_other_branches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let (a, b) = store
      .atomic(|tx| {
        let a = branches::insert(tx, "Nord", Currency::EUR, false)?;
        let b = branches::insert(tx, "Ost", Currency::EUR, false)?;
        Ok((a.id, b.id))
      })
      .expect("branches");
    let fresh_sold = shelve(&store, Some(a), "Gestern", Some(1));
    let on_shelf = shelve(&store, Some(a), "Heute", None);
    let other = shelve(&store, Some(b), "Drüben", Some(90));

    let sweeper = RetentionSweeper::new(store.clone(), Arc::new(FsCoverStore::new(dir.path())));
    let report = sweeper.purge_by_branch(a).expect("purge");

    assert_eq!(report.deleted, vec![fresh_sold]);
    store
      .read(|conn| {
        assert!(books::find(conn, on_shelf)?.is_some());
        assert!(books::find(conn, other)?.is_some());
        Ok(())
      })
      .expect("read");
  }

  /// Reads the store from inside cleanup, which only works while no unit
  /// of work holds the connection.
  struct RowCheckingCovers {
    store: Arc<Store>,
    row_present: std::sync::Mutex<Vec<bool>>,
  }

  impl CoverStore for RowCheckingCovers {
    fn put(&self, _: Uuid, _: &[u8]) -> Result<()> {
      Ok(())
    }

    fn delete(&self, book_id: Uuid) -> Result<()> {
      let present = self.store.read(|conn| books::find(conn, book_id))?.is_some();
      if let Ok(mut seen) = self.row_present.lock() {
        seen.push(present);
      }
      Ok(())
    }

    fn fetch(&self, _: Uuid, _: CoverSize) -> Result<Vec<u8>> {
      Ok(Vec::new())
    }
  }

  #[test]
  fn covers_are_cleaned_outside_the_lock_before_rows_go() {
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let first = shelve(&store, None, "Erster", Some(30));
    let second = shelve(&store, None, "Zweiter", Some(45));
    let covers = Arc::new(RowCheckingCovers {
      store: store.clone(),
      row_present: std::sync::Mutex::new(Vec::new()),
    });

    let sweeper = RetentionSweeper::new(store.clone(), covers.clone());
    let report = sweeper.purge(DEFAULT_RETENTION_DAYS, Utc::now()).expect("purge");

    assert_eq!(report.deleted.len(), 2);
    assert!(report.deleted.contains(&first) && report.deleted.contains(&second));
    assert_eq!(*covers.row_present.lock().expect("lock"), vec![true, true]);
  }

  #[test]
  fn purge_by_branch_takes_removed_books() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let branch = store
      .atomic(|tx| branches::insert(tx, "West", Currency::EUR, false))
      .expect("branch")
      .id;
    let removed = shelve(&store, Some(branch), "Ausgemustert", None);
    let kept = shelve(&store, Some(branch), "Im Regal", None);
    store
      .atomic(|tx| {
        let mut book = books::get(tx, removed)?;
        book.removed = true;
        book.removed_on = Some(Utc::now());
        books::save(tx, &book)
      })
      .expect("remove");

    let sweeper = RetentionSweeper::new(store.clone(), Arc::new(FsCoverStore::new(dir.path())));
    let report = sweeper.purge_by_branch(branch).expect("purge");

    assert_eq!(report.deleted, vec![removed]);
    assert!(store.read(|conn| books::find(conn, kept)).expect("read").is_some());
  }

  #[test]
  fn purge_rolls_back_when_store_fails() {
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let dir = tempfile::tempdir().expect("tempdir");
    let old = shelve(&store, None, "Bleibt", Some(50));
    store
      .atomic(|tx| {
        tx.execute_batch(
          "CREATE TRIGGER refuse_delete BEFORE DELETE ON book BEGIN SELECT RAISE(ABORT, 'locked'); END;",
        )?;
        Ok(())
      })
      .expect("trigger");

    let sweeper = RetentionSweeper::new(store.clone(), Arc::new(FsCoverStore::new(dir.path())));
    assert!(matches!(
      sweeper.purge(DEFAULT_RETENTION_DAYS, Utc::now()),
      Err(InventoryError::Store(_))
    ));
    assert!(store.read(|conn| books::find(conn, old)).expect("read").is_some());
  }
}
