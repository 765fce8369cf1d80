//! HTTP route handlers for the signaler.

use axum::{
    Json, Router,
    extract::{State, ws::WebSocketUpgrade},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use medirelay_common::SignalError;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

mod doctor;
mod health;
mod patient;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Signaling transport
        .route("/ws", get(ws_upgrade))

        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/metrics", get(health::metrics))

        // REST presence and matchmaking
        .nest("/api", api_routes())

        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/doctor/status", post(doctor::set_status))
        .route("/doctor/heartbeat", post(doctor::heartbeat))
        .route("/patient/find-doctor", post(patient::find_doctor))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| crate::ws::handle_socket(socket, state))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

const RETRY_AFTER_SECS: &str = "1";

/// JSON `{message}` error with an HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    /// Collaborator outage; clients may retry shortly
    retryable: bool,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<SignalError> for ApiError {
    fn from(err: SignalError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }
        Self {
            status,
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(MessageResponse { message: self.message });
        if self.retryable {
            (self.status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response()
        } else {
            (self.status, body).into_response()
        }
    }
}
