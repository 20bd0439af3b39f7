//! Typed partial updates for job records.
//!
//! The set of writable columns is fixed here; a `None` field is never
//! written, so a later call cannot erase data supplied by an earlier one.

use serde::{Deserialize, Serialize};

use crate::status::SubmissionSource;

/// Optional field updates applied together with a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_name: Option<String>,
}

impl JobUpdate {
    /// Update carrying only an exit code.
    pub fn exit_code(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Update carrying only a script path.
    pub fn script_path(path: impl Into<String>) -> Self {
        Self {
            script_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// True when no field would be written.
    pub fn is_empty(&self) -> bool {
        self.exit_code.is_none() && self.text_fields().iter().all(|(_, v)| v.is_none())
    }

    /// Text columns paired with their values, in column order.
    pub fn text_fields(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("command", self.command.as_deref()),
            ("script_path", self.script_path.as_deref()),
            ("nodes", self.nodes.as_deref()),
            ("cpus", self.cpus.as_deref()),
            ("gpus", self.gpus.as_deref()),
            ("memory", self.memory.as_deref()),
            ("partition_name", self.partition_name.as_deref()),
        ]
    }
}

/// Registration of a job record (also the body of `POST /api/job/register`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRegistration {
    pub job_id: String,
    pub job_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_source: Option<SubmissionSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_name: Option<String>,
}

impl JobRegistration {
    /// Registration with only the required identity fields.
    pub fn new(job_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            submission_source: None,
            script_path: None,
            command: None,
            nodes: None,
            cpus: None,
            gpus: None,
            memory: None,
            partition_name: None,
        }
    }

    /// Optional columns paired with their values, in column order.
    pub fn optional_fields(&self) -> [(&'static str, Option<&str>); 8] {
        [
            (
                "submission_source",
                self.submission_source.as_ref().map(SubmissionSource::as_str),
            ),
            ("script_path", self.script_path.as_deref()),
            ("command", self.command.as_deref()),
            ("nodes", self.nodes.as_deref()),
            ("cpus", self.cpus.as_deref()),
            ("gpus", self.gpus.as_deref()),
            ("memory", self.memory.as_deref()),
            ("partition_name", self.partition_name.as_deref()),
        ]
    }
}
