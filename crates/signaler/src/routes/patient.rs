//! Patient-side REST matchmaking.

use axum::{Json, extract::State};
use medirelay_common::{PresenceRecord, Tier};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::session::connect_patient;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindDoctorRequest {
    #[serde(rename = "patientID")]
    patient_id: Option<String>,
    preferred_level: Option<Tier>,
    case_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FindDoctorResponse {
    message: &'static str,
    doctor: PresenceRecord,
}

/// Match a patient over REST; the pairing is announced like a socket request
pub async fn find_doctor(
    State(state): State<AppState>,
    Json(req): Json<FindDoctorRequest>,
) -> Result<Json<FindDoctorResponse>, ApiError> {
    let Some(patient_id) = req.patient_id.filter(|id| !id.is_empty()) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    match connect_patient(&state, &patient_id, req.preferred_level, req.case_type).await? {
        Some(doctor) => Ok(Json(FindDoctorResponse {
            message: "Doctor assigned",
            doctor,
        })),
        None => Err(ApiError::not_found("No available doctor found")),
    }
}
