//! Direct-store transport

use slm_protocol::{EventRequest, JobRegistration, JobStatus, JobUpdate};
use slm_store::JobStore;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{StatusTransport, TransportError, TransportKind};

/// Writes job state straight into the job database.
pub struct DirectStoreTransport {
    store: Mutex<Option<JobStore>>,
}

impl DirectStoreTransport {
    /// Open the database at `path`, creating tables as needed.
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        let store = JobStore::open(path)?;
        tracing::info!(target: "slm::store", path = %path.display(), "job database opened");
        Ok(Self::from_store(store))
    }

    /// Wrap an already-open store.
    pub fn from_store(store: JobStore) -> Self {
        Self {
            store: Mutex::new(Some(store)),
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, Option<JobStore>>, TransportError> {
        self.store
            .lock()
            .map_err(|_| TransportError::Unavailable("store lock poisoned".to_string()))
    }
}

impl StatusTransport for DirectStoreTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Store
    }

    fn register_job(&self, registration: &JobRegistration) -> Result<Option<i64>, TransportError> {
        let guard = self.store()?;
        let store = guard.as_ref().ok_or(TransportError::Closed)?;

        match store.register_job(registration) {
            Ok(id) => {
                tracing::info!(
                    target: "slm::store",
                    job_id = %registration.job_id,
                    source = ?registration.submission_source,
                    "registered job"
                );
                Ok(Some(id))
            }
            Err(e) => {
                tracing::warn!(target: "slm::store", job_id = %registration.job_id, "failed to register job: {}", e);
                Err(e.into())
            }
        }
    }

    fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: &JobUpdate,
    ) -> Result<(), TransportError> {
        let guard = self.store()?;
        let store = guard.as_ref().ok_or(TransportError::Closed)?;

        match store.update_status(job_id, status, update) {
            Ok(true) => {
                tracing::info!(target: "slm::store", %job_id, %status, "updated job status");
                Ok(())
            }
            Ok(false) => {
                tracing::info!(target: "slm::store", %job_id, %status, "no job record to update");
                Err(TransportError::NotFound(job_id.to_string()))
            }
            Err(e) => {
                tracing::warn!(target: "slm::store", %job_id, %status, "failed to update job status: {}", e);
                Err(e.into())
            }
        }
    }

    fn log_event(&self, event: &EventRequest) -> Result<Option<i64>, TransportError> {
        let guard = self.store()?;
        let store = guard.as_ref().ok_or(TransportError::Closed)?;

        match store.log_event(
            &event.job_id,
            &event.event_type,
            &event.event_status,
            &event.details,
            event.metadata.as_ref(),
        ) {
            Ok(id) => {
                tracing::debug!(target: "slm::store", job_id = %event.job_id, status = %event.event_status, "logged event");
                Ok(Some(id))
            }
            Err(e) => {
                tracing::warn!(target: "slm::store", job_id = %event.job_id, "failed to log event: {}", e);
                Err(e.into())
            }
        }
    }

    fn close(&self) {
        if let Ok(mut guard) = self.store.lock() {
            if guard.take().is_some() {
                tracing::debug!(target: "slm::store", "job database closed");
            }
        }
    }
}
