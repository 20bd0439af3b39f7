//! Response bodies of the reporting API.

use serde::{Deserialize, Serialize};

/// Response envelope shared by the three job endpoints.
///
/// `success` is authoritative; the HTTP status only refines why a call
/// failed (404 for an unknown job, 400 for a malformed request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl ApiResponse {
    /// Create a success response for a job.
    pub fn ok(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            job_id: Some(job_id.into()),
            status: None,
            record_id: None,
            event_id: None,
            message: message.into(),
        }
    }

    /// Create a failure response; `job_id` is absent when the request
    /// could not be read far enough to know it.
    pub fn failure(job_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            job_id,
            status: None,
            record_id: None,
            event_id: None,
            message: message.into(),
        }
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub service: String,
    pub status: String,
    pub database: String,
}
