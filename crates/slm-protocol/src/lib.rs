//! SLM Protocol Types
//!
//! Shared vocabulary between the `slm` supervisor, the job store and the
//! HTTP reporting service: job statuses, submission sources, the typed
//! partial update applied to job records, and the JSON bodies of the
//! reporting API.

pub mod request;
pub mod response;
pub mod status;
pub mod update;

pub use request::{EventRequest, StatusRequest};
pub use response::{ApiResponse, HealthResponse};
pub use status::{JobStatus, ParseStatusError, SubmissionSource};
pub use update::{JobRegistration, JobUpdate};

/// Event type used for every status change recorded by the supervisor.
pub const EVENT_TYPE_LIFECYCLE: &str = "lifecycle";

/// Sentinel for values the environment did not provide.
pub const UNKNOWN: &str = "unknown";

/// Health probe endpoint.
pub const PATH_HEALTH: &str = "/";

/// Job registration endpoint.
pub const PATH_REGISTER: &str = "/api/job/register";

/// Job status update endpoint.
pub const PATH_STATUS: &str = "/api/job/status";

/// Lifecycle event endpoint.
pub const PATH_EVENT: &str = "/api/job/event";

/// Value of `status` in a healthy service's probe response.
pub const HEALTH_RUNNING: &str = "running";

/// Service name reported by the health probe.
pub const SERVICE_NAME: &str = "SLM Job API";
