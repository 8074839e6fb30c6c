use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::covers::CoverStore;
use crate::db::Store;
use crate::duplicates;
use crate::error::{InventoryError, Result};
use crate::lifecycle;
use crate::models::{Book, BookDraft, BookPatch, BranchId, CoverSize};
use crate::repo::{books, reservations};

/// Direct book actions issued on behalf of one branch.
#[derive(Clone)]
pub struct BookService {
  store: Arc<Store>,
  covers: Arc<dyn CoverStore>,
}

fn accessible(book: Book, branch: BranchId) -> Result<Book> {
  if book.is_accessible_by(branch) {
    Ok(book)
  } else {
    Err(InventoryError::forbidden("book", book.id))
  }
}

impl BookService {
  pub fn new(store: Arc<Store>, covers: Arc<dyn CoverStore>) -> Self {
    BookService { store, covers }
  }

  pub fn find(&self, branch: BranchId, id: Uuid) -> Result<Book> {
    let book = self.store.read(|conn| books::get(conn, id))?;
    accessible(book, branch)
  }

  pub fn list(&self, branch: BranchId) -> Result<Vec<Book>> {
    self.store.read(|conn| books::find_by_branch(conn, branch))
  }

  /// Intake of a new book. Rejected with `Conflict` when an identical
  /// record already exists.
  pub fn create(&self, draft: BookDraft) -> Result<Book> {
    let book = Book::from_draft(draft, Utc::now());
    book.validate()?;
    self.store.atomic(|tx| {
      duplicates::ensure_unique(tx, &book)?;
      books::insert(tx, &book)?;
      Ok(())
    })?;
    log::info!("book {} added (\"{}\")", book.id, book.title);
    Ok(book)
  }

  pub fn update(&self, branch: BranchId, id: Uuid, patch: BookPatch) -> Result<Book> {
    if patch.reserved == Some(true) {
      return Err(InventoryError::ValidationFailed(
        "books are reserved through a reservation".to_string(),
      ));
    }
    self.store.atomic(|tx| {
      let mut book = accessible(books::get(tx, id)?, branch)?;
      apply_patch(&mut book, patch);
      book.validate()?;
      duplicates::ensure_unique(tx, &book)?;
      books::save(tx, &book)?;
      Ok(book)
    })
  }

  pub fn sell(&self, branch: BranchId, id: Uuid) -> Result<Book> {
    self.transition(branch, id, |book| lifecycle::mark_sold(book, Utc::now()))
  }

  pub fn remove(&self, branch: BranchId, id: Uuid) -> Result<Book> {
    self.transition(branch, id, |book| lifecycle::mark_removed(book, Utc::now()))
  }

  pub fn release(&self, branch: BranchId, id: Uuid) -> Result<Book> {
    self.transition(branch, id, lifecycle::release)
  }

  /// Attaches one book to an existing reservation of the same branch.
  pub fn reserve(&self, branch: BranchId, id: Uuid, reservation_id: Uuid) -> Result<Book> {
    self.store.atomic(|tx| {
      let reservation = reservations::get(tx, reservation_id)?;
      if reservation.branch_id != branch {
        return Err(InventoryError::forbidden("reservation", reservation_id));
      }
      let mut book = accessible(books::get(tx, id)?, branch)?;
      if book.sold || book.removed {
        return Err(InventoryError::ValidationFailed(format!(
          "book {} is no longer available",
          id
        )));
      }
      lifecycle::reserve(&mut book, reservation_id, Utc::now())?;
      books::save(tx, &book)?;
      Ok(book)
    })
  }

  /// Removes the cover derivatives, then the book row. A failed cover
  /// cleanup is logged and does not stop the row delete.
  pub fn delete(&self, branch: BranchId, id: Uuid) -> Result<()> {
    self.find(branch, id)?;
    if let Err(err) = self.covers.delete(id) {
      log::warn!("cover cleanup failed for book {}: {}", id, err);
    }
    self.store.atomic(|tx| {
      accessible(books::get(tx, id)?, branch)?;
      books::delete(tx, id)
    })?;
    log::info!("book {} deleted", id);
    Ok(())
  }

  pub fn upload_cover(&self, branch: BranchId, id: Uuid, image: &[u8]) -> Result<()> {
    self.find(branch, id)?;
    self.covers.put(id, image)
  }

  pub fn cover(&self, id: Uuid, size: CoverSize) -> Result<Vec<u8>> {
    self.covers.fetch(id, size)
  }

  fn transition<F>(&self, branch: BranchId, id: Uuid, apply: F) -> Result<Book>
  where
    F: FnOnce(&mut Book),
  {
    self.store.atomic(|tx| {
      let mut book = accessible(books::get(tx, id)?, branch)?;
      apply(&mut book);
      books::save(tx, &book)?;
      Ok(book)
    })
  }
}

fn apply_patch(book: &mut Book, patch: BookPatch) {
  let now = Utc::now();
  if let Some(title) = patch.title {
    book.title = title;
  }
  if let Some(subtitle) = patch.subtitle {
    book.subtitle = subtitle;
  }
  if let Some(description) = patch.short_description {
    book.short_description = description;
  }
  if let Some(author) = patch.author_id {
    book.author_id = author;
  }
  if let Some(genre) = patch.genre_id {
    book.genre_id = genre;
  }
  if let Some(format) = patch.format_id {
    book.format_id = format;
  }
  if let Some(condition) = patch.condition_id {
    book.condition_id = condition;
  }
  if let Some(price) = patch.price {
    book.price = price;
  }
  if let Some(year) = patch.release_year {
    book.release_year = year;
  }
  if let Some(mut tags) = patch.tags {
    tags.sort_unstable();
    tags.dedup();
    book.tags = tags;
  }
  if let Some(recommendation) = patch.recommendation {
    book.recommendation = recommendation;
  }
  if let Some(duplicate) = patch.duplicate {
    book.duplicate = duplicate;
  }
  if let Some(sold) = patch.sold {
    lifecycle::set_sold(book, sold, now);
  }
  if let Some(removed) = patch.removed {
    lifecycle::set_removed(book, removed, now);
  }
  if patch.reserved == Some(false) {
    lifecycle::release(book);
  }
}
