//! Clinician handover.
//!
//! Reassigns a patient session from one clinician to another without
//! touching the media session. Each attempt is an in-memory state machine:
//!
//! ```text
//! Requested → ClinicianLocated → Announced → Complete
//!     ↓
//!   Failed
//! ```
//!
//! Notifications go through the relay router like any other signaling, so
//! they may arrive out of order or, when remote, not at all. There is no
//! acknowledgment tracking and no rollback once announced.

use std::sync::Arc;

use medirelay_common::{PresenceRecord, Recipient, ServerMessage};

use crate::matchmaking::Matchmaker;
use crate::relay::{Delivery, RelayRouter};

const NO_REPLACEMENT: &str = "No other doctor available";
const DIRECTORY_DOWN: &str = "Doctor directory unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoverState {
    Requested,
    ClinicianLocated,
    Announced,
    Complete,
    Failed,
}

impl HandoverState {
    fn can_advance_to(self, next: HandoverState) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::ClinicianLocated)
                | (Self::Requested, Self::Failed)
                | (Self::ClinicianLocated, Self::Announced)
                | (Self::Announced, Self::Complete)
        )
    }
}

/// A clinician asking to hand `patient_id` to someone else
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverRequest {
    pub patient_id: String,
    pub from_clinician: String,
}

/// Final state of one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct HandoverReport {
    pub state: HandoverState,
    pub replacement: Option<PresenceRecord>,
    pub failure_reason: Option<String>,
    /// Per-notification outcome, in send order
    pub notifications: Vec<(Recipient, Delivery)>,
}

struct Attempt<'a> {
    request: &'a HandoverRequest,
    state: HandoverState,
}

impl<'a> Attempt<'a> {
    fn new(request: &'a HandoverRequest) -> Self {
        tracing::debug!(
            patient = %request.patient_id,
            from = %request.from_clinician,
            "Handover requested"
        );
        Self {
            request,
            state: HandoverState::Requested,
        }
    }

    fn advance(&mut self, next: HandoverState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid handover transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(
            patient = %self.request.patient_id,
            from_state = ?self.state,
            to_state = ?next,
            "Handover transition"
        );
        self.state = next;
    }
}

pub struct HandoverOrchestrator {
    matchmaker: Arc<Matchmaker>,
    router: Arc<RelayRouter>,
}

impl HandoverOrchestrator {
    pub fn new(matchmaker: Arc<Matchmaker>, router: Arc<RelayRouter>) -> Self {
        Self { matchmaker, router }
    }

    /// Run one handover attempt to completion or failure.
    ///
    /// On failure only the requesting clinician hears about it and the
    /// existing pairing is left alone.
    pub async fn execute(&self, request: &HandoverRequest) -> HandoverReport {
        let mut attempt = Attempt::new(request);

        let selection = self
            .matchmaker
            .select_excluding(None, Some(&request.from_clinician))
            .await;

        let replacement = match selection {
            Ok(Some(record)) => record,
            Ok(None) => return self.fail(attempt, NO_REPLACEMENT).await,
            Err(e) => {
                tracing::warn!(error = %e, patient = %request.patient_id, "Handover lookup failed");
                return self.fail(attempt, DIRECTORY_DOWN).await;
            }
        };
        attempt.advance(HandoverState::ClinicianLocated);

        let origin = Some(request.from_clinician.as_str());
        let plan = [
            (
                Recipient::clinician(&request.from_clinician),
                ServerMessage::HandoverStart {
                    new_doctor_id: replacement.identity.clone(),
                },
            ),
            (
                Recipient::clinician(&replacement.identity),
                ServerMessage::IncomingHandover {
                    patient_id: request.patient_id.clone(),
                    from_doctor_id: request.from_clinician.clone(),
                },
            ),
            (
                Recipient::patient(&request.patient_id),
                ServerMessage::Renegotiate {
                    new_doctor_id: replacement.identity.clone(),
                },
            ),
        ];

        let mut notifications = Vec::with_capacity(plan.len());
        for (target, message) in plan {
            let delivery = self.router.relay(&target, message, origin).await;
            notifications.push((target, delivery));
        }
        attempt.advance(HandoverState::Announced);

        tracing::info!(
            patient = %request.patient_id,
            from = %request.from_clinician,
            to = %replacement.identity,
            tier = %replacement.tier,
            "Patient handed over"
        );
        attempt.advance(HandoverState::Complete);

        HandoverReport {
            state: attempt.state,
            replacement: Some(replacement),
            failure_reason: None,
            notifications,
        }
    }

    async fn fail(&self, mut attempt: Attempt<'_>, reason: &str) -> HandoverReport {
        attempt.advance(HandoverState::Failed);
        let request = attempt.request;

        let target = Recipient::clinician(&request.from_clinician);
        let message = ServerMessage::HandoverFailed {
            reason: reason.to_string(),
        };
        let delivery = self.router.relay(&target, message, None).await;

        tracing::info!(
            patient = %request.patient_id,
            from = %request.from_clinician,
            reason,
            "Handover failed"
        );

        HandoverReport {
            state: attempt.state,
            replacement: None,
            failure_reason: Some(reason.to_string()),
            notifications: vec![(target, delivery)],
        }
    }
}
