//! SLM - Slurm Lifecycle Monitor
//!
//! Wraps a user command, follows it through the scheduler's job-control
//! signals, and records its lifecycle (registration, status transitions,
//! events) either directly in the job store or through the reporting
//! service.

pub mod config;
pub mod identity;
pub mod logging;
pub mod query;
pub mod recorder;
pub mod submit;
pub mod supervisor;
pub mod transport;

pub use config::{CliOverrides, ConfigError, SlmConfig};
pub use identity::JobIdentity;
pub use recorder::{LifecycleRecorder, RecordError};
pub use transport::{StatusTransport, TransportError, TransportKind};
