//! SLM HTTP API Service
//!
//! Receives job registrations, status updates and lifecycle events from
//! compute nodes and writes them to the job store. Every endpoint answers
//! with an [`ApiResponse`]; malformed requests get `success: false` and a
//! 400, never a dropped connection.

mod handlers;

pub use handlers::{handle_event, handle_register, handle_status};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use slm_protocol::{
    ApiResponse, HealthResponse, HEALTH_RUNNING, PATH_EVENT, PATH_HEALTH, PATH_REGISTER,
    PATH_STATUS, SERVICE_NAME,
};
use slm_store::JobStore;
use std::sync::{Arc, Mutex};

const DATABASE_CONNECTED: &str = "connected";
const DATABASE_DISCONNECTED: &str = "disconnected";

/// Shared service state
#[derive(Clone)]
pub struct ApiState {
    store: Arc<Mutex<JobStore>>,
}

impl ApiState {
    pub fn new(store: JobStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Run `f` with exclusive access to the store.
    fn with_store<F>(&self, f: F) -> (StatusCode, ApiResponse)
    where
        F: FnOnce(&JobStore) -> (StatusCode, ApiResponse),
    {
        match self.store.lock() {
            Ok(store) => f(&store),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::failure(None, "Job store unavailable"),
            ),
        }
    }

    /// `"connected"` when the store answers a trivial query.
    fn database_state(&self) -> &'static str {
        match self.store.lock() {
            Ok(store) => match store.ping() {
                Ok(()) => DATABASE_CONNECTED,
                Err(e) => {
                    tracing::warn!(target: "slm::http", "health check query failed: {}", e);
                    DATABASE_DISCONNECTED
                }
            },
            Err(_) => DATABASE_DISCONNECTED,
        }
    }
}

/// Build the service router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(health))
        .route(PATH_REGISTER, post(register))
        .route(PATH_STATUS, post(status))
        .route(PATH_EVENT, post(event))
        .with_state(state)
}

/// Serve the API on an already-bound listener until the task is dropped.
pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: SERVICE_NAME.to_string(),
        status: HEALTH_RUNNING.to_string(),
        database: state.database_state().to_string(),
    })
}

async fn register(State(state): State<ApiState>, body: Bytes) -> (StatusCode, Json<ApiResponse>) {
    let (code, response) = state.with_store(|store| handle_register(store, &body));
    (code, Json(response))
}

async fn status(State(state): State<ApiState>, body: Bytes) -> (StatusCode, Json<ApiResponse>) {
    let (code, response) = state.with_store(|store| handle_status(store, &body));
    (code, Json(response))
}

async fn event(State(state): State<ApiState>, body: Bytes) -> (StatusCode, Json<ApiResponse>) {
    let (code, response) = state.with_store(|store| handle_event(store, &body));
    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_state_connected() {
        let state = ApiState::new(JobStore::in_memory().unwrap());
        assert_eq!(state.database_state(), "connected");
    }

    #[test]
    fn test_database_state_after_poisoned_lock() {
        let state = ApiState::new(JobStore::in_memory().unwrap());
        let shared = state.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.store.lock().unwrap();
            panic!("poison the store lock");
        })
        .join();
        assert_eq!(state.database_state(), "disconnected");
    }
}
