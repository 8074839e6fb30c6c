//! Operator commands for the bookstock engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use bookstock::models::BranchId;
use bookstock::{AppConfig, Bookstock};

#[derive(Parser)]
#[command(name = "bookstock", about = "Bookstore inventory maintenance")]
struct Cli {
  /// JSON configuration file.
  #[arg(long, env = "BOOKSTOCK_CONFIG")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Delete books sold or removed longer ago than the retention window.
  Purge {
    /// Retention window in days; defaults to the configured value.
    #[arg(long)]
    days: Option<u32>,
  },

  /// Delete every sold or removed book of one branch.
  PurgeBranch { branch: BranchId },

  /// Bytes used by stored cover images.
  CoverUsage,

  /// Number of open reservations of a branch.
  ReservationsOpen { branch: BranchId },

  /// Current stocktake of a branch, if one is open.
  StocktakeStatus { branch: BranchId },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let cli = Cli::parse();
  let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
  let engine = Bookstock::open(&config)
    .with_context(|| format!("opening store {}", config.database_path.display()))?;

  match cli.command {
    Commands::Purge { days } => {
      let days = days.unwrap_or(config.retention_days);
      let report = engine.retention.purge(days, Utc::now())?;
      print_json(&report)?;
    }

    Commands::PurgeBranch { branch } => {
      let report = engine.retention.purge_by_branch(branch)?;
      print_json(&report)?;
    }

    Commands::CoverUsage => {
      let bytes = engine.covers.disk_usage()?;
      println!("{} bytes in {}", bytes, engine.covers.dir().display());
    }

    Commands::ReservationsOpen { branch } => {
      let count = engine.reservations.open_count(branch)?;
      println!("{}", count);
    }

    Commands::StocktakeStatus { branch } => match engine.stocktakes.current(branch)? {
      Some(session) => print_json(&session)?,
      None => println!("no open stocktake for branch {}", branch),
    },
  }

  Ok(())
}
