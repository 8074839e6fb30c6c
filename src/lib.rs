//! Multi-branch bookstore inventory engine.
//!
//! Books move through sold/removed/reserved states, are counted in
//! per-branch stocktakes, claimed by customer reservations and eventually
//! purged together with their cover images. All state lives in one SQLite
//! store; every multi-row change runs in a single transaction.

use std::sync::Arc;

pub mod books;
pub mod config;
pub mod covers;
pub mod db;
pub mod duplicates;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod repo;
pub mod reservations;
pub mod retention;
pub mod stocktake;

pub use books::BookService;
pub use config::AppConfig;
pub use covers::{CoverStore, FsCoverStore};
pub use db::Store;
pub use error::{InventoryError, Result};
pub use reservations::{ReservationManager, ReservationReceipt, SkipReason};
pub use retention::{PurgeReport, RetentionSweeper};
pub use stocktake::{StocktakeManager, ToggleOutcome};

/// Every manager wired to one store and one cover directory.
#[derive(Clone)]
pub struct Bookstock {
  pub store: Arc<Store>,
  pub covers: Arc<FsCoverStore>,
  pub books: BookService,
  pub stocktakes: StocktakeManager,
  pub reservations: ReservationManager,
  pub retention: RetentionSweeper,
}

impl Bookstock {
  pub fn open(config: &AppConfig) -> Result<Self> {
    let store = Arc::new(Store::open_with_timeout(
      &config.database_path,
      config.busy_timeout_ms,
    )?);
    log::info!("opened store at {}", config.database_path.display());
    Ok(Self::with_store(store, FsCoverStore::new(&config.covers_dir)))
  }

  pub fn with_store(store: Arc<Store>, covers: FsCoverStore) -> Self {
    let covers = Arc::new(covers);
    let shared: Arc<dyn CoverStore> = covers.clone();
    Bookstock {
      books: BookService::new(store.clone(), shared.clone()),
      stocktakes: StocktakeManager::new(store.clone()),
      reservations: ReservationManager::new(store.clone()),
      retention: RetentionSweeper::new(store.clone(), shared),
      covers,
      store,
    }
  }
}
