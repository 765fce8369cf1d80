//! REST presence updates for clinicians not holding a socket here.

use axum::{Json, extract::State};
use medirelay_common::{PresenceRecord, Tier};
use serde::{Deserialize, Serialize};

use super::{ApiError, MessageResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(rename = "doctorID")]
    doctor_id: Option<String>,
    #[serde(rename = "socketID")]
    socket_id: Option<String>,
    level: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<PresenceRecord>,
}

/// Publish or withdraw a clinician's presence
pub async fn set_status(
    State(state): State<AppState>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let (Some(doctor_id), Some(socket_id), Some(level), Some(status)) =
        (non_empty(req.doctor_id), non_empty(req.socket_id), req.level, req.status)
    else {
        return Err(ApiError::bad_request("Missing required fields"));
    };
    let tier: Tier = level.parse().map_err(ApiError::from)?;

    if status.eq_ignore_ascii_case("offline") {
        state.directory.delete(tier, &doctor_id).await?;
        tracing::info!(identity = %doctor_id, tier = %tier, "Doctor set offline via REST");
        return Ok(Json(StatusResponse {
            message: "Doctor set to offline".to_string(),
            data: None,
        }));
    }
    if !status.eq_ignore_ascii_case("online") {
        return Err(ApiError::bad_request(format!("unknown status {status:?}")));
    }

    let ttl = state.config.presence.ttl();
    let record = PresenceRecord::online(&doctor_id, socket_id.into(), tier, ttl);
    state.directory.put(&record, ttl).await?;
    tracing::info!(identity = %doctor_id, tier = %tier, "Doctor set online via REST");

    Ok(Json(StatusResponse {
        message: "Doctor status updated".to_string(),
        data: Some(record),
    }))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(rename = "doctorID")]
    doctor_id: Option<String>,
    level: Option<String>,
}

/// Refresh an existing presence record
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(doctor_id) = non_empty(req.doctor_id) else {
        return Err(ApiError::bad_request("doctorID missing"));
    };
    let Some(level) = req.level else {
        return Err(ApiError::bad_request("level missing"));
    };
    let tier: Tier = level.parse().map_err(ApiError::from)?;

    let ttl = state.config.presence.ttl();
    if !state.directory.refresh(tier, &doctor_id, ttl).await? {
        return Err(ApiError::not_found("Doctor not found (offline?)"));
    }

    Ok(Json(MessageResponse {
        message: "Heartbeat received, status refreshed".to_string(),
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
