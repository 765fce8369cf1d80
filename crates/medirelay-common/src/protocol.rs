//! WebSocket wire messages and the cross-instance bus envelope.
//!
//! Every message is a JSON object tagged by `type`. Field names follow the
//! browser clients (`toUserID`, `doctorID`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::constants::topics;
use crate::types::{ConnectionId, PresenceStatus, Recipient, Role, Tier, now_millis, random_token};
use crate::SignalError;

/// Client → server signaling body (offer / answer / ice / hangup)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    #[serde(rename = "toUserID")]
    pub to_user_id: String,

    /// Narrows the lookup when a patient and clinician share an identity
    #[serde(rename = "toRole", default, skip_serializing_if = "Option::is_none")]
    pub to_role: Option<Role>,

    #[serde(default)]
    pub payload: Value,
}

/// Messages accepted from clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Register {
        id: String,
        role: Role,
        #[serde(default)]
        level: Option<Tier>,
    },
    #[serde(rename_all = "camelCase")]
    CallRequest {
        #[serde(default)]
        preferred_level: Option<Tier>,
        #[serde(default)]
        case_type: Option<String>,
    },
    Offer(SignalRequest),
    Answer(SignalRequest),
    Ice(SignalRequest),
    Hangup(SignalRequest),
    Handover {
        #[serde(rename = "patientID")]
        patient_id: String,
    },
    Heartbeat,
    Status {
        status: PresenceStatus,
    },
    /// Any `type` this server does not know; ignored
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse one text frame.
    ///
    /// Returns `Serialization` for frames that are not a JSON object with a
    /// string `type` (dropped silently by callers) and `InvalidInput` for a
    /// known type with missing or mistyped fields (answered with `error`).
    pub fn parse(text: &str) -> Result<Self, SignalError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.get("type").is_some_and(Value::is_string) {
            return Err(SignalError::Serialization("missing type tag".to_string()));
        }
        serde_json::from_value(value).map_err(|e| SignalError::InvalidInput(e.to_string()))
    }
}

/// The four relayable signaling message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
    Hangup,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Ice => "ice",
            Self::Hangup => "hangup",
        })
    }
}

/// Server → client signaling body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedSignal {
    #[serde(rename = "fromUserID")]
    pub from_user_id: Option<String>,

    #[serde(default)]
    pub payload: Value,
}

/// Messages sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    SocketId {
        #[serde(rename = "socketID")]
        socket_id: ConnectionId,
    },
    Registered {
        #[serde(rename = "socketID")]
        socket_id: ConnectionId,
        id: String,
    },
    IncomingCall {
        #[serde(rename = "fromPatientID")]
        from_patient_id: String,
        #[serde(rename = "caseType", default, skip_serializing_if = "Option::is_none")]
        case_type: Option<String>,
    },
    DoctorAssigned {
        #[serde(rename = "doctorID")]
        doctor_id: String,
        #[serde(rename = "doctorLevel")]
        doctor_level: Tier,
        #[serde(rename = "caseType", default, skip_serializing_if = "Option::is_none")]
        case_type: Option<String>,
    },
    NoDoctorAvailable,
    Offer(RelayedSignal),
    Answer(RelayedSignal),
    Ice(RelayedSignal),
    Hangup(RelayedSignal),
    HandoverStart {
        #[serde(rename = "newDoctorID")]
        new_doctor_id: String,
    },
    IncomingHandover {
        #[serde(rename = "patientID")]
        patient_id: String,
        #[serde(rename = "fromDoctorID")]
        from_doctor_id: String,
    },
    Renegotiate {
        #[serde(rename = "newDoctorID")]
        new_doctor_id: String,
    },
    HandoverFailed {
        reason: String,
    },
    HeartbeatAck,
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Wrap a relayed signaling body in the variant for `kind`
    pub fn signal(kind: SignalKind, body: RelayedSignal) -> Self {
        match kind {
            SignalKind::Offer => Self::Offer(body),
            SignalKind::Answer => Self::Answer(body),
            SignalKind::Ice => Self::Ice(body),
            SignalKind::Hangup => Self::Hangup(body),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Bus topic used when this message has to leave the process
    pub fn topic(&self) -> Topic {
        match self {
            Self::IncomingCall { .. } | Self::DoctorAssigned { .. } | Self::NoDoctorAvailable => {
                Topic::CallRequests
            }
            Self::HandoverStart { .. }
            | Self::IncomingHandover { .. }
            | Self::Renegotiate { .. }
            | Self::HandoverFailed { .. } => Topic::CallHandover,
            _ => Topic::SignalingEvents,
        }
    }

    /// The wire `type` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SocketId { .. } => "socket-id",
            Self::Registered { .. } => "registered",
            Self::IncomingCall { .. } => "incoming-call",
            Self::DoctorAssigned { .. } => "doctor-assigned",
            Self::NoDoctorAvailable => "no-doctor-available",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Ice(_) => "ice",
            Self::Hangup(_) => "hangup",
            Self::HandoverStart { .. } => "handover-start",
            Self::IncomingHandover { .. } => "incoming-handover",
            Self::Renegotiate { .. } => "renegotiate",
            Self::HandoverFailed { .. } => "handover-failed",
            Self::HeartbeatAck => "heartbeat-ack",
            Self::Error { .. } => "error",
        }
    }
}

/// Cross-instance bus topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    SignalingEvents,
    CallRequests,
    CallHandover,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::SignalingEvents, Topic::CallRequests, Topic::CallHandover];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignalingEvents => topics::SIGNALING_EVENTS,
            Self::CallRequests => topics::CALL_REQUESTS,
            Self::CallHandover => topics::CALL_HANDOVER,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of delivery on the cross-instance bus.
///
/// Consumed by every node; only the node holding `target` delivers it.
/// `id` lets consumers drop redelivered copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub target: Recipient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub origin_node: String,
    pub message: ServerMessage,
    pub sent_at: i64,
}

impl Envelope {
    pub fn new(
        target: Recipient,
        message: ServerMessage,
        origin: Option<String>,
        origin_node: impl Into<String>,
    ) -> Self {
        Self {
            id: random_token(),
            target,
            origin,
            origin_node: origin_node.into(),
            message,
            sent_at: now_millis(),
        }
    }

    pub fn topic(&self) -> Topic {
        self.message.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_register() {
        let msg = ClientMessage::parse(r#"{"type":"register","id":"m1","role":"doctor","level":"MO"}"#)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                id: "m1".to_string(),
                role: Role::Clinician,
                level: Some(Tier::Mo),
            }
        );
    }

    #[test]
    fn test_parse_signal() {
        let msg = ClientMessage::parse(
            r#"{"type":"ice","toUserID":"p1","payload":{"candidate":"a=1"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Ice(req) => {
                assert_eq!(req.to_user_id, "p1");
                assert_eq!(req.to_role, None);
                assert_eq!(req.payload["candidate"], "a=1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_call_request_camel_case() {
        let msg = ClientMessage::parse(r#"{"type":"call-request","preferredLevel":"CHO"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CallRequest {
                preferred_level: Some(Tier::Cho),
                case_type: None,
            }
        );
    }

    #[test]
    fn test_unknown_type_is_ignored_not_rejected() {
        let msg = ClientMessage::parse(r#"{"type":"cancel","foo":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(SignalError::Serialization(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"id":"x"}"#),
            Err(SignalError::Serialization(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"handover"}"#),
            Err(SignalError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::Renegotiate {
            new_doctor_id: "c1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "renegotiate", "newDoctorID": "c1"})
        );

        let msg = ServerMessage::signal(
            SignalKind::Offer,
            RelayedSignal {
                from_user_id: Some("p1".to_string()),
                payload: json!({"sdp": "v=0"}),
            },
        );
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "offer", "fromUserID": "p1", "payload": {"sdp": "v=0"}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::NoDoctorAvailable).unwrap(),
            json!({"type": "no-doctor-available"})
        );
    }

    #[test]
    fn test_topics_follow_message_kind() {
        let handover = ServerMessage::HandoverStart {
            new_doctor_id: "c1".to_string(),
        };
        assert_eq!(handover.topic(), Topic::CallHandover);
        assert_eq!(ServerMessage::NoDoctorAvailable.topic(), Topic::CallRequests);
        assert_eq!(
            ServerMessage::signal(SignalKind::Ice, RelayedSignal { from_user_id: None, payload: Value::Null }).topic(),
            Topic::SignalingEvents
        );
    }

    #[test]
    fn test_envelope_survives_the_bus_encoding() {
        let envelope = Envelope::new(
            Recipient::patient("p1"),
            ServerMessage::Renegotiate {
                new_doctor_id: "c1".to_string(),
            },
            Some("m1".to_string()),
            "node-a",
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.topic(), Topic::CallHandover);
    }
}
