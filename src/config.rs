use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{InventoryError, Result};
use crate::retention::DEFAULT_RETENTION_DAYS;

pub const ENV_DATABASE: &str = "BOOKSTOCK_DATABASE";
pub const ENV_COVERS_DIR: &str = "BOOKSTOCK_COVERS_DIR";
pub const ENV_RETENTION_DAYS: &str = "BOOKSTOCK_RETENTION_DAYS";

/// Runtime settings. Every field has a default so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub database_path: PathBuf,
  pub covers_dir: PathBuf,
  pub retention_days: u32,
  pub busy_timeout_ms: u64,
}

impl Default for AppConfig {
  fn default() -> Self {
    AppConfig {
      database_path: PathBuf::from("bookstock.db"),
      covers_dir: PathBuf::from("uploads"),
      retention_days: DEFAULT_RETENTION_DAYS,
      busy_timeout_ms: 5000,
    }
  }
}

impl AppConfig {
  /// Reads the JSON file at `path` if given, then applies environment
  /// overrides.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => AppConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self> {
    let raw = match std::fs::read_to_string(path) {
      Ok(raw) => raw,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        log::info!("config {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
      }
      Err(err) => return Err(err.into()),
    };
    serde_json::from_str(&raw)
      .map_err(|err| InventoryError::Config(format!("{}: {}", path.display(), err)))
  }

  pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(value) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
      self.database_path = PathBuf::from(value);
    }
    if let Some(value) = lookup(ENV_COVERS_DIR).filter(|v| !v.trim().is_empty()) {
      self.covers_dir = PathBuf::from(value);
    }
    if let Some(value) = lookup(ENV_RETENTION_DAYS) {
      self.retention_days = value.trim().parse().map_err(|_| {
        InventoryError::Config(format!("{} must be a whole number of days, got \"{}\"", ENV_RETENTION_DAYS, value))
      })?;
    }
    Ok(())
  }
}
