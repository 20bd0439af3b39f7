//! Rows read back from the store.

use serde::{Deserialize, Serialize};

/// A job record as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub job_id: String,
    pub job_name: String,
    pub submission_source: Option<String>,
    pub script_path: Option<String>,
    pub command: Option<String>,
    pub nodes: Option<String>,
    pub cpus: Option<String>,
    pub gpus: Option<String>,
    pub memory: Option<String>,
    pub partition_name: Option<String>,
    pub status: Option<String>,
    pub exit_code: Option<i32>,
    pub submitted_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A lifecycle event as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub job_id: String,
    pub event_type: String,
    pub event_status: String,
    pub details: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// Number of jobs currently in one status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: Option<String>,
    pub count: u64,
}

/// Run time of jobs with both a start and a completion stamp, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSummary {
    pub jobs: u64,
    pub average_seconds: f64,
    pub min_seconds: i64,
    pub max_seconds: i64,
}

/// Aggregate figures over the whole job table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    /// Most common status first
    pub by_status: Vec<StatusCount>,
    /// Jobs with a completion stamp
    pub finished: u64,
    /// Finished with exit code 0
    pub succeeded: u64,
    /// Finished with a nonzero exit code
    pub failed: u64,
    pub duration: Option<DurationSummary>,
}
