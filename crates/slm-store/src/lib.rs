//! SLM Job Store
//!
//! SQLite persistence for job records and their lifecycle events.
//!
//! - `jobs`: one mutable row per `job_id`
//! - `events`: append-only lifecycle audit trail, not constrained to
//!   existing jobs

mod record;
mod store;

pub use record::{DurationSummary, JobRecord, JobStatistics, StatusCount, StoredEvent};
pub use store::{timestamp_column, JobStore};

use std::io;
use std::path::PathBuf;

/// Database location used when nothing else is configured:
/// `$HOME/.slm/slm.db`, or `slm.db` in the working directory without `HOME`.
pub fn default_db_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".slm").join("slm.db"),
        None => PathBuf::from("slm.db"),
    }
}

/// Errors for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
