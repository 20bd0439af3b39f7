//! Status transport
//!
//! One interface for persisting job state, with two production
//! implementations chosen once at startup:
//! - [`DirectStoreTransport`]: writes straight to the job database
//! - [`RemoteApiTransport`]: posts JSON to the reporting service
//!
//! [`MemoryTransport`] keeps everything in process for tests.

mod http;
mod memory;
mod store;

pub use http::RemoteApiTransport;
pub use memory::{MemoryRecord, MemoryTransport, TransportCall};
pub use store::DirectStoreTransport;

use slm_protocol::{EventRequest, JobRegistration, JobStatus, JobUpdate};
use slm_store::StoreError;
use std::fmt;
use std::sync::Arc;

use crate::config::SlmConfig;

/// Set by slurmd for processes it launches; marks a compute node.
pub const NODE_MARKER: &str = "SLURMD_NODENAME";

/// Persistence channel for job records and lifecycle events.
pub trait StatusTransport: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> TransportKind;

    /// Insert the job, or fill in the supplied fields of an existing record.
    /// Returns the record id when the backend reports one.
    fn register_job(&self, registration: &JobRegistration) -> Result<Option<i64>, TransportError>;

    /// Change a job's status and apply field updates.
    /// Fails with [`TransportError::NotFound`] when no record matches.
    fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: &JobUpdate,
    ) -> Result<(), TransportError>;

    /// Append a lifecycle event. Returns the event id when reported.
    fn log_event(&self, event: &EventRequest) -> Result<Option<i64>, TransportError>;

    /// Release the connection. Later calls fail with [`TransportError::Closed`].
    fn close(&self);
}

/// Backend variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Store,
    Remote,
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Store => write!(f, "store"),
            TransportKind::Remote => write!(f, "remote"),
            TransportKind::Memory => write!(f, "memory"),
        }
    }
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Transport closed")]
    Closed,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Failures meaning the backend cannot be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            TransportError::Unavailable(_) => true,
            TransportError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Backends to try, in order.
///
/// On a compute node writes funnel through the reporting service, with the
/// store as fallback. Elsewhere only the store is used.
pub fn candidates(on_compute_node: bool, db_enabled: bool) -> Vec<TransportKind> {
    let mut kinds = Vec::new();
    if on_compute_node {
        kinds.push(TransportKind::Remote);
    }
    if db_enabled {
        kinds.push(TransportKind::Store);
    }
    kinds
}

/// Pick the transport for this process from the real environment.
pub fn select(config: &SlmConfig) -> Option<Arc<dyn StatusTransport>> {
    select_from(config, |key| std::env::var(key).ok())
}

/// Pick the transport with an injected environment lookup.
///
/// Returns `None` when no candidate initialises; callers then run with
/// console-only reporting.
pub fn select_from<F>(config: &SlmConfig, env: F) -> Option<Arc<dyn StatusTransport>>
where
    F: Fn(&str) -> Option<String>,
{
    let on_compute_node = env(NODE_MARKER).map_or(false, |v| !v.is_empty());

    for kind in candidates(on_compute_node, config.db_enabled) {
        let opened: Result<Arc<dyn StatusTransport>, TransportError> = match kind {
            TransportKind::Remote => RemoteApiTransport::connect(
                &config.api_url,
                config.request_timeout(),
                config.probe_timeout(),
            )
            .map(|t| Arc::new(t) as Arc<dyn StatusTransport>),
            TransportKind::Store => DirectStoreTransport::open(&config.db_path)
                .map(|t| Arc::new(t) as Arc<dyn StatusTransport>),
            TransportKind::Memory => continue,
        };

        match opened {
            Ok(transport) => {
                tracing::info!(transport = %kind, compute_node = on_compute_node, "reporting transport ready");
                return Some(transport);
            }
            Err(e) => {
                tracing::warn!(transport = %kind, "transport unavailable: {}", e);
            }
        }
    }

    tracing::warn!("no reporting transport available; lifecycle is logged to the console only");
    None
}
