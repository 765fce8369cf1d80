//! Per-connection message handling.
//!
//! One [`ClientSession`] per accepted transport. It owns the connection's
//! identity/role/tier once registered and dispatches inbound frames to the
//! registry, matchmaking, relay and handover components. Nothing here
//! blocks on another connection; failures are answered or logged and never
//! end the session.

use medirelay_common::{
    ClientMessage, Partition, PresenceRecord, PresenceStatus, Recipient, RelayedSignal, Role,
    ServerMessage, SignalError, SignalKind, SignalRequest, Tier,
};

use crate::handover::HandoverRequest;
use crate::registry::Connection;
use crate::relay::Delivery;
use crate::state::AppState;

/// Identity attached by the first `register`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    identity: String,
    partition: Partition,
}

pub struct ClientSession {
    state: AppState,
    conn: Connection,
    registration: Option<Registration>,
    /// Set by `status offline`; heartbeats then leave presence withdrawn
    offline: bool,
}

impl ClientSession {
    pub fn new(state: AppState, conn: Connection) -> Self {
        Self {
            state,
            conn,
            registration: None,
            offline: false,
        }
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Tell the client its connection id
    pub fn greet(&self) {
        self.reply(ServerMessage::SocketId {
            socket_id: self.conn.id().clone(),
        });
    }

    /// Handle one inbound text frame
    pub async fn handle_text(&mut self, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(SignalError::InvalidInput(reason)) => {
                tracing::debug!(connection_id = %self.conn.id(), reason = %reason, "Rejected message");
                self.reply(ServerMessage::error(reason));
                return;
            }
            Err(e) => {
                tracing::debug!(connection_id = %self.conn.id(), error = %e, "Dropped unparsable frame");
                return;
            }
        };

        self.handle(message).await;
    }

    pub async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Register { id, role, level } => self.register(id, role, level).await,
            ClientMessage::CallRequest {
                preferred_level,
                case_type,
            } => self.call_request(preferred_level, case_type).await,
            ClientMessage::Offer(req) => self.signal(SignalKind::Offer, req).await,
            ClientMessage::Answer(req) => self.signal(SignalKind::Answer, req).await,
            ClientMessage::Ice(req) => self.signal(SignalKind::Ice, req).await,
            ClientMessage::Hangup(req) => self.signal(SignalKind::Hangup, req).await,
            ClientMessage::Handover { patient_id } => self.handover(patient_id).await,
            ClientMessage::Heartbeat => self.heartbeat().await,
            ClientMessage::Status { status } => self.set_status(status).await,
            ClientMessage::Unknown => {
                tracing::trace!(connection_id = %self.conn.id(), "Ignored unknown message type");
            }
        }
    }

    async fn register(&mut self, identity: String, role: Role, level: Option<Tier>) {
        if identity.is_empty() {
            self.reply(ServerMessage::error("register requires a non-empty id"));
            return;
        }
        let partition = match Partition::for_role(role, level) {
            Ok(p) => p,
            Err(e) => {
                self.reply(ServerMessage::error(e.to_string()));
                return;
            }
        };

        let next = Registration {
            identity: identity.clone(),
            partition,
        };
        if let Some(previous) = self.registration.take() {
            if previous != next {
                self.unregister(&previous).await;
            }
        }

        self.state
            .registry
            .register(&identity, partition, self.conn.clone())
            .await;
        if let Partition::Clinician(tier) = partition {
            self.withdraw_other_tiers(&identity, tier).await;
            self.publish_presence(&identity, tier).await;
        }
        self.registration = Some(next);
        self.offline = false;

        tracing::info!(
            identity = %identity,
            partition = %partition,
            connection_id = %self.conn.id(),
            "Client registered"
        );
        self.reply(ServerMessage::Registered {
            socket_id: self.conn.id().clone(),
            id: identity,
        });
    }

    async fn call_request(&mut self, preferred: Option<Tier>, case_type: Option<String>) {
        let Some(patient_id) = self.identity_as(Role::Patient) else {
            self.reply(ServerMessage::error("call-request requires a registered patient"));
            return;
        };

        match connect_patient(&self.state, &patient_id, preferred, case_type).await {
            Ok(Some(_)) => {}
            Ok(None) => self.reply(ServerMessage::NoDoctorAvailable),
            Err(e) => {
                tracing::warn!(patient = %patient_id, error = %e, "Matchmaking failed");
                self.reply(ServerMessage::NoDoctorAvailable);
            }
        }
    }

    async fn signal(&mut self, kind: SignalKind, request: SignalRequest) {
        let Some(registration) = &self.registration else {
            self.reply(ServerMessage::error(format!("{kind} requires registration")));
            return;
        };

        let target = Recipient::new(request.to_user_id, request.to_role);
        let message = ServerMessage::signal(
            kind,
            RelayedSignal {
                from_user_id: Some(registration.identity.clone()),
                payload: request.payload,
            },
        );

        tracing::debug!(
            kind = %kind,
            from = %registration.identity,
            to = %target,
            "Relaying signal"
        );
        self.state
            .router
            .relay(&target, message, Some(&registration.identity))
            .await;
    }

    async fn handover(&mut self, patient_id: String) {
        let Some(from_clinician) = self.identity_as(Role::Clinician) else {
            self.reply(ServerMessage::error("handover requires a registered doctor"));
            return;
        };

        let request = HandoverRequest {
            patient_id,
            from_clinician,
        };
        self.state.handover.execute(&request).await;
    }

    async fn heartbeat(&mut self) {
        if let Some(Registration {
            identity,
            partition: Partition::Clinician(tier),
        }) = self.registration.clone()
        {
            let partition = Partition::Clinician(tier);
            if self.offline {
                tracing::trace!(identity = %identity, "Heartbeat while offline, presence left withdrawn");
            } else if !self.is_current(&identity, partition).await {
                tracing::debug!(
                    identity = %identity,
                    connection_id = %self.conn.id(),
                    "Heartbeat from superseded connection ignored"
                );
            } else {
                self.refresh_presence(&identity, tier).await;
            }
        }
        self.reply(ServerMessage::HeartbeatAck);
    }

    async fn refresh_presence(&self, identity: &str, tier: Tier) {
        let ttl = self.state.config.presence.ttl();
        match self.state.directory.refresh(tier, identity, ttl).await {
            Ok(true) => {}
            // Record expired while the socket stayed open
            Ok(false) => self.publish_presence(identity, tier).await,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Presence refresh failed");
            }
        }
    }

    async fn set_status(&mut self, status: PresenceStatus) {
        let Some(Registration {
            identity,
            partition: Partition::Clinician(tier),
        }) = self.registration.clone()
        else {
            self.reply(ServerMessage::error("status requires a registered doctor"));
            return;
        };

        match status {
            PresenceStatus::Online => {
                if !self.is_current(&identity, Partition::Clinician(tier)).await {
                    self.reply(ServerMessage::error("registration superseded by a newer connection"));
                    return;
                }
                self.offline = false;
                self.publish_presence(&identity, tier).await;
            }
            PresenceStatus::Offline => {
                self.offline = true;
                if let Err(e) = self.state.directory.delete(tier, &identity).await {
                    tracing::warn!(identity = %identity, error = %e, "Presence delete failed");
                } else {
                    tracing::info!(identity = %identity, tier = %tier, "Doctor went offline");
                }
            }
        }
    }

    /// Detach from the registry (stale-close guarded) and withdraw presence
    pub async fn close(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.unregister(&registration).await;
        }
        tracing::info!(connection_id = %self.conn.id(), "Connection closed");
    }

    async fn unregister(&self, registration: &Registration) {
        self.state
            .registry
            .remove(self.conn.id(), &registration.identity, registration.partition)
            .await;

        let Partition::Clinician(tier) = registration.partition else {
            return;
        };

        // Withdraw presence only while the record still names this
        // connection, even if the registry already moved on. Not atomic; a
        // racing re-registration elsewhere is repaired by its heartbeat.
        match self.state.directory.get(tier, &registration.identity).await {
            Ok(Some(record)) if record.connection_id == *self.conn.id() => {
                if let Err(e) = self.state.directory.delete(tier, &registration.identity).await {
                    tracing::warn!(identity = %registration.identity, error = %e, "Presence delete failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(identity = %registration.identity, error = %e, "Presence lookup failed");
            }
        }
    }

    /// Whether the local registry still routes `identity` to this connection
    async fn is_current(&self, identity: &str, partition: Partition) -> bool {
        self.state
            .registry
            .lookup_in(identity, partition)
            .await
            .is_some_and(|conn| conn.id() == self.conn.id())
    }

    /// A clinician is listed under one tier only
    async fn withdraw_other_tiers(&self, identity: &str, tier: Tier) {
        for other in Tier::PRIORITY.into_iter().filter(|t| *t != tier) {
            if let Err(e) = self.state.directory.delete(other, identity).await {
                tracing::warn!(identity = %identity, tier = %other, error = %e, "Presence delete failed");
            }
        }
    }

    async fn publish_presence(&self, identity: &str, tier: Tier) {
        let ttl = self.state.config.presence.ttl();
        let record = PresenceRecord::online(identity, self.conn.id().clone(), tier, ttl);
        if let Err(e) = self.state.directory.put(&record, ttl).await {
            tracing::warn!(identity = %identity, error = %e, "Presence update failed");
        }
    }

    fn identity_as(&self, role: Role) -> Option<String> {
        self.registration
            .as_ref()
            .filter(|r| r.partition.role() == role)
            .map(|r| r.identity.clone())
    }

    fn reply(&self, message: ServerMessage) {
        if let Err(e) = self.conn.send(message) {
            tracing::debug!(connection_id = %self.conn.id(), error = %e, "Reply dropped");
        }
    }
}

/// Match a patient with a clinician and announce the pairing to both.
///
/// The clinician gets `incoming-call`, the patient `doctor-assigned`, each
/// through the relay router. Returns the chosen clinician, `None` when
/// nobody is available.
pub async fn connect_patient(
    state: &AppState,
    patient_id: &str,
    preferred: Option<Tier>,
    case_type: Option<String>,
) -> Result<Option<PresenceRecord>, SignalError> {
    let Some(clinician) = state.matchmaker.select_clinician(preferred).await? else {
        return Ok(None);
    };

    let to_clinician = state
        .router
        .relay(
            &Recipient::clinician(&clinician.identity),
            ServerMessage::IncomingCall {
                from_patient_id: patient_id.to_string(),
                case_type: case_type.clone(),
            },
            Some(patient_id),
        )
        .await;
    let to_patient = state
        .router
        .relay(
            &Recipient::patient(patient_id),
            ServerMessage::DoctorAssigned {
                doctor_id: clinician.identity.clone(),
                doctor_level: clinician.tier,
                case_type,
            },
            None,
        )
        .await;

    if to_clinician == Delivery::Dropped || to_patient == Delivery::Dropped {
        tracing::warn!(patient = %patient_id, doctor = %clinician.identity, "Pairing announcement dropped");
    }
    tracing::info!(
        patient = %patient_id,
        doctor = %clinician.identity,
        tier = %clinician.tier,
        "Patient matched"
    );
    Ok(Some(clinician))
}
