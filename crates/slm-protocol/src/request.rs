//! Request bodies of the reporting API.
//!
//! The registration body is [`JobRegistration`](crate::JobRegistration).

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;
use crate::update::JobUpdate;

/// Body of `POST /api/job/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub job_id: String,
    pub status: JobStatus,
    /// Optional field updates, flattened into the top-level object.
    #[serde(flatten)]
    pub update: JobUpdate,
}

/// Body of `POST /api/job/event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRequest {
    pub job_id: String,
    pub event_type: String,
    pub event_status: String,
    #[serde(default)]
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_request_is_flat() {
        let request = StatusRequest {
            job_id: "slurm-7".to_string(),
            status: JobStatus::Failed,
            update: JobUpdate::exit_code(2),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"job_id": "slurm-7", "status": "FAILED", "exit_code": 2})
        );
    }

    #[test]
    fn test_status_request_parses_optional_fields() {
        let request: StatusRequest = serde_json::from_value(json!({
            "job_id": "slurm-7",
            "status": "RUNNING",
            "command": "python train.py",
            "nodes": "gpu[01-02]"
        }))
        .unwrap();
        assert_eq!(request.status, JobStatus::Running);
        assert_eq!(request.update.command.as_deref(), Some("python train.py"));
        assert_eq!(request.update.nodes.as_deref(), Some("gpu[01-02]"));
        assert_eq!(request.update.exit_code, None);
    }

    #[test]
    fn test_event_request_defaults_details() {
        let request: EventRequest = serde_json::from_value(json!({
            "job_id": "raw-1",
            "event_type": "lifecycle",
            "event_status": "PAUSED"
        }))
        .unwrap();
        assert_eq!(request.details, "");
        assert!(request.metadata.is_none());
    }
}
