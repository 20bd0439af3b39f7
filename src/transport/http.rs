//! Remote-API transport
//!
//! Each operation is one JSON POST to the reporting service. A connect
//! error or timeout disables the transport for the rest of the process;
//! later calls fail fast with [`TransportError::Unavailable`].

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use slm_protocol::{
    ApiResponse, EventRequest, HealthResponse, JobRegistration, JobStatus, JobUpdate,
    StatusRequest, HEALTH_RUNNING, PATH_EVENT, PATH_HEALTH, PATH_REGISTER, PATH_STATUS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{StatusTransport, TransportError, TransportKind};

/// Maximum response body echoed into error messages.
const MAX_ERROR_BODY: usize = 200;

/// Reports job state through the HTTP reporting service.
#[derive(Debug)]
pub struct RemoteApiTransport {
    client: Client,
    base_url: String,
    disabled: AtomicBool,
    closed: AtomicBool,
}

impl RemoteApiTransport {
    /// Build a client and probe the service's health endpoint.
    ///
    /// Fails unless the probe answers with `status: "running"`.
    pub fn connect(
        base_url: &str,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        let transport = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            disabled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        transport.probe(probe_timeout)?;
        tracing::info!(target: "slm::http", url = %transport.base_url, "connected to reporting service");
        Ok(transport)
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn probe(&self, timeout: Duration) -> Result<(), TransportError> {
        let url = format!("{}{}", self.base_url, PATH_HEALTH);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .map_err(|e| TransportError::Unavailable(format!("{}: {}", url, e)))?;

        let health: HealthResponse = response
            .json()
            .map_err(|e| TransportError::Malformed(format!("health probe: {}", e)))?;

        if health.status != HEALTH_RUNNING {
            return Err(TransportError::Unavailable(format!(
                "service at {} reports status {:?}",
                self.base_url, health.status
            )));
        }
        Ok(())
    }

    /// POST `body`; returns the HTTP status and the raw response body.
    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(StatusCode, String), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.disabled.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "reporting service unreachable earlier in this run".to_string(),
            ));
        }

        let url = format!("{}{}", self.base_url, path);
        let response = match self.client.post(&url).json(body).send() {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                self.disabled.store(true, Ordering::SeqCst);
                tracing::warn!(target: "slm::http", %url, "reporting service unreachable, disabling: {}", e);
                return Err(TransportError::Unavailable(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        Ok((status, response.text()?))
    }

    /// POST `body` and decode the response envelope.
    fn post_api<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(StatusCode, ApiResponse), TransportError> {
        let (status, text) = self.post(path, body)?;
        Ok((status, decode(status, &text)?))
    }
}

fn decode(status: StatusCode, text: &str) -> Result<ApiResponse, TransportError> {
    serde_json::from_str::<ApiResponse>(text).map_err(|_| {
        let excerpt: String = text.chars().take(MAX_ERROR_BODY).collect();
        TransportError::Malformed(format!("HTTP {}: {}", status, excerpt))
    })
}

fn rejected(status: StatusCode, api: &ApiResponse) -> TransportError {
    let message = if api.message.is_empty() {
        "Unknown error"
    } else {
        api.message.as_str()
    };
    TransportError::Rejected(format!("HTTP {}: {}", status, message))
}

impl StatusTransport for RemoteApiTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Remote
    }

    fn register_job(&self, registration: &JobRegistration) -> Result<Option<i64>, TransportError> {
        let job_id = &registration.job_id;
        match self.post_api(PATH_REGISTER, registration) {
            Ok((status, api)) if status.is_success() && api.success => {
                tracing::info!(
                    target: "slm::http",
                    %job_id,
                    source = ?registration.submission_source,
                    "registered job via API"
                );
                Ok(api.record_id)
            }
            Ok((status, api)) => {
                let err = rejected(status, &api);
                tracing::warn!(target: "slm::http", %job_id, "failed to register job: {}", err);
                Err(err)
            }
            Err(e) => {
                tracing::warn!(target: "slm::http", %job_id, "failed to register job: {}", e);
                Err(e)
            }
        }
    }

    fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        update: &JobUpdate,
    ) -> Result<(), TransportError> {
        let request = StatusRequest {
            job_id: job_id.to_string(),
            status,
            update: update.clone(),
        };

        // A 404 means no record whatever the body says.
        let result = self.post(PATH_STATUS, &request).and_then(|(code, text)| {
            if code == StatusCode::NOT_FOUND {
                return Err(TransportError::NotFound(job_id.to_string()));
            }
            Ok((code, decode(code, &text)?))
        });

        match result {
            Ok((code, api)) if code.is_success() && api.success => {
                tracing::info!(target: "slm::http", %job_id, %status, "updated job status via API");
                Ok(())
            }
            Err(TransportError::NotFound(id)) => {
                tracing::info!(target: "slm::http", %job_id, %status, "no job record to update");
                Err(TransportError::NotFound(id))
            }
            Ok((code, api)) => {
                let err = rejected(code, &api);
                tracing::warn!(target: "slm::http", %job_id, %status, "failed to update job status: {}", err);
                Err(err)
            }
            Err(e) => {
                tracing::warn!(target: "slm::http", %job_id, %status, "failed to update job status: {}", e);
                Err(e)
            }
        }
    }

    fn log_event(&self, event: &EventRequest) -> Result<Option<i64>, TransportError> {
        let job_id = &event.job_id;
        match self.post_api(PATH_EVENT, event) {
            Ok((code, api)) if code.is_success() && api.success => {
                tracing::debug!(target: "slm::http", %job_id, status = %event.event_status, "logged event via API");
                Ok(api.event_id)
            }
            Ok((code, api)) => {
                let err = rejected(code, &api);
                tracing::warn!(target: "slm::http", %job_id, "failed to log event: {}", err);
                Err(err)
            }
            Err(e) => {
                tracing::warn!(target: "slm::http", %job_id, "failed to log event: {}", e);
                Err(e)
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
