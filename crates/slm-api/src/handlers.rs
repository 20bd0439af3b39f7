//! Request handling for the three job endpoints.
//!
//! Handlers are synchronous and take the raw body so that validation
//! failures produce the same response envelope as store failures.

use axum::http::StatusCode;
use serde_json::Value;
use slm_protocol::{ApiResponse, EventRequest, JobRegistration, StatusRequest};
use slm_store::JobStore;

/// Parse the body and check that every `required` field is a non-empty string.
fn parse_body(body: &[u8], required: &[&str]) -> Result<Value, (StatusCode, ApiResponse)> {
    let value: Value = serde_json::from_slice(body).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            ApiResponse::failure(None, "Invalid JSON"),
        )
    })?;

    let missing = required.iter().any(|field| {
        value
            .get(field)
            .and_then(Value::as_str)
            .map_or(true, str::is_empty)
    });
    if missing {
        let job_id = value.get("job_id").and_then(Value::as_str).map(String::from);
        return Err((
            StatusCode::BAD_REQUEST,
            ApiResponse::failure(
                job_id,
                format!("Missing required fields: {}", required.join(", ")),
            ),
        ));
    }

    Ok(value)
}

fn decode<T: serde::de::DeserializeOwned>(
    value: Value,
    job_id: &str,
) -> Result<T, (StatusCode, ApiResponse)> {
    serde_json::from_value(value).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            ApiResponse::failure(Some(job_id.to_string()), format!("Invalid request: {}", e)),
        )
    })
}

fn job_id_of(value: &Value) -> String {
    value
        .get("job_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// `POST /api/job/register`
pub fn handle_register(store: &JobStore, body: &[u8]) -> (StatusCode, ApiResponse) {
    let value = match parse_body(body, &["job_id", "job_name"]) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    let job_id = job_id_of(&value);
    let registration: JobRegistration = match decode(value, &job_id) {
        Ok(registration) => registration,
        Err(rejection) => return rejection,
    };

    match store.register_job(&registration) {
        Ok(record_id) => {
            tracing::info!(
                %job_id,
                source = ?registration.submission_source,
                "registered job"
            );
            let mut response = ApiResponse::ok(job_id, "Job registered successfully");
            response.record_id = Some(record_id);
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!(%job_id, "failed to register job: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::failure(Some(job_id), format!("Failed to register job: {}", e)),
            )
        }
    }
}

/// `POST /api/job/status`
///
/// Answers 404 when no record exists so that the caller can register the
/// job itself.
pub fn handle_status(store: &JobStore, body: &[u8]) -> (StatusCode, ApiResponse) {
    let value = match parse_body(body, &["job_id", "status"]) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    let job_id = job_id_of(&value);
    let request: StatusRequest = match decode(value, &job_id) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };

    match store.update_status(&request.job_id, request.status, &request.update) {
        Ok(true) => {
            tracing::info!(%job_id, status = %request.status, "updated job status");
            let mut response = ApiResponse::ok(job_id, "Job status updated successfully");
            response.status = Some(request.status.to_string());
            (StatusCode::OK, response)
        }
        Ok(false) => {
            tracing::warn!(%job_id, "job not found for status update");
            (
                StatusCode::NOT_FOUND,
                ApiResponse::failure(Some(job_id), "Job not found"),
            )
        }
        Err(e) => {
            tracing::error!(%job_id, "failed to update job status: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::failure(Some(job_id), format!("Failed to update job status: {}", e)),
            )
        }
    }
}

/// `POST /api/job/event`
pub fn handle_event(store: &JobStore, body: &[u8]) -> (StatusCode, ApiResponse) {
    let value = match parse_body(body, &["job_id", "event_type", "event_status"]) {
        Ok(value) => value,
        Err(rejection) => return rejection,
    };
    let job_id = job_id_of(&value);
    let request: EventRequest = match decode(value, &job_id) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };

    match store.log_event(
        &request.job_id,
        &request.event_type,
        &request.event_status,
        &request.details,
        request.metadata.as_ref(),
    ) {
        Ok(event_id) => {
            tracing::info!(%job_id, status = %request.event_status, "logged event");
            let mut response = ApiResponse::ok(job_id, "Event logged successfully");
            response.event_id = Some(event_id);
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!(%job_id, "failed to log event: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::failure(Some(job_id), format!("Failed to log event: {}", e)),
            )
        }
    }
}
