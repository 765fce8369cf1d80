//! Multi-node flows: two signaler nodes in one process sharing an
//! in-memory presence directory and bus.

use std::sync::Arc;
use std::time::Duration;

use medirelay_common::{RelayedSignal, ServerMessage, Tier, Topic};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use crate::bus::MemoryBus;
use crate::config::AppConfig;
use crate::presence::MemoryDirectory;
use crate::registry::Connection;
use crate::relay::run_bus_consumer;
use crate::session::ClientSession;
use crate::state::AppState;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Cluster {
    a: AppState,
    b: AppState,
    bus: Arc<MemoryBus>,
    shutdown: broadcast::Sender<()>,
}

impl Cluster {
    async fn start() -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let bus = Arc::new(MemoryBus::new());
        let (shutdown, _) = broadcast::channel(1);

        let node = |id: &str| {
            let config = AppConfig {
                node_id: id.to_string(),
                ..AppConfig::default()
            };
            AppState::with_backends(config, directory.clone(), bus.clone())
        };
        let a = node("node-a");
        let b = node("node-b");

        for state in [&a, &b] {
            tokio::spawn(run_bus_consumer(state.router.clone(), shutdown.subscribe()));
        }
        while Topic::ALL.iter().any(|t| bus.subscriber_count(*t) < 2) {
            tokio::task::yield_now().await;
        }

        Self { a, b, bus, shutdown }
    }

    fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

struct Client {
    session: ClientSession,
    rx: mpsc::Receiver<ServerMessage>,
}

impl Client {
    async fn connect(node: &AppState, register: &str) -> Self {
        let (conn, rx) = Connection::channel(16);
        let mut client = Self {
            session: ClientSession::new(node.clone(), conn),
            rx,
        };
        client.send(register).await;
        assert!(matches!(client.recv().await, ServerMessage::Registered { .. }));
        client
    }

    async fn send(&mut self, text: &str) {
        self.session.handle_text(text).await;
    }

    async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection queue closed")
    }

    fn assert_idle(&mut self) {
        assert!(self.rx.try_recv().is_err(), "unexpected message queued");
    }
}

#[tokio::test]
async fn test_signal_crosses_nodes() {
    let cluster = Cluster::start().await;
    let mut m1 = Client::connect(&cluster.a, r#"{"type":"register","id":"m1","role":"doctor","level":"MO"}"#).await;
    let mut p1 = Client::connect(&cluster.b, r#"{"type":"register","id":"p1","role":"patient"}"#).await;

    m1.send(r#"{"type":"offer","toUserID":"p1","payload":{"sdp":"v=0 offer"}}"#).await;
    assert_eq!(
        p1.recv().await,
        ServerMessage::Offer(RelayedSignal {
            from_user_id: Some("m1".to_string()),
            payload: json!({"sdp": "v=0 offer"}),
        })
    );

    p1.send(r#"{"type":"answer","toUserID":"m1","toRole":"doctor","payload":{"sdp":"v=0 answer"}}"#).await;
    assert!(matches!(m1.recv().await, ServerMessage::Answer(s) if s.from_user_id.as_deref() == Some("p1")));

    // Exactly once each, although both nodes consume every envelope
    tokio::time::sleep(Duration::from_millis(50)).await;
    m1.assert_idle();
    p1.assert_idle();
    assert_eq!(cluster.bus.published(), 2);
    cluster.stop();
}

#[tokio::test]
async fn test_reconnect_on_other_node_receives_relay() {
    let cluster = Cluster::start().await;
    let mut m1 = Client::connect(&cluster.a, r#"{"type":"register","id":"m1","role":"doctor","level":"MO"}"#).await;
    let mut old_p1 = Client::connect(&cluster.a, r#"{"type":"register","id":"p1","role":"patient"}"#).await;

    // Patient drops and comes back through node B
    old_p1.session.close().await;
    drop(old_p1);
    let mut p1 = Client::connect(&cluster.b, r#"{"type":"register","id":"p1","role":"patient"}"#).await;

    m1.send(r#"{"type":"ice","toUserID":"p1","payload":{"candidate":"c"}}"#).await;
    assert!(matches!(p1.recv().await, ServerMessage::Ice(_)));
    cluster.stop();
}

#[tokio::test]
async fn test_fallback_match_then_handover_across_nodes() {
    let cluster = Cluster::start().await;
    let mut m1 = Client::connect(&cluster.a, r#"{"type":"register","id":"m1","role":"doctor","level":"MO"}"#).await;
    let mut p1 = Client::connect(&cluster.b, r#"{"type":"register","id":"p1","role":"patient"}"#).await;

    // No CHO online: falls back to the MO on the other node
    p1.send(r#"{"type":"call-request","preferredLevel":"CHO","caseType":"normal"}"#).await;
    assert_eq!(
        p1.recv().await,
        ServerMessage::DoctorAssigned {
            doctor_id: "m1".to_string(),
            doctor_level: Tier::Mo,
            case_type: Some("normal".to_string()),
        }
    );
    assert_eq!(
        m1.recv().await,
        ServerMessage::IncomingCall {
            from_patient_id: "p1".to_string(),
            case_type: Some("normal".to_string()),
        }
    );

    let mut c1 = Client::connect(&cluster.b, r#"{"type":"register","id":"c1","role":"doctor","level":"CIVIL"}"#).await;

    m1.send(r#"{"type":"handover","patientID":"p1"}"#).await;

    assert_eq!(
        m1.recv().await,
        ServerMessage::HandoverStart {
            new_doctor_id: "c1".to_string()
        }
    );
    assert_eq!(
        c1.recv().await,
        ServerMessage::IncomingHandover {
            patient_id: "p1".to_string(),
            from_doctor_id: "m1".to_string(),
        }
    );
    assert_eq!(
        p1.recv().await,
        ServerMessage::Renegotiate {
            new_doctor_id: "c1".to_string()
        }
    );
    cluster.stop();
}

#[tokio::test]
async fn test_handover_without_replacement_only_tells_requester() {
    let cluster = Cluster::start().await;
    let mut m1 = Client::connect(&cluster.a, r#"{"type":"register","id":"m1","role":"doctor","level":"MO"}"#).await;
    let mut p1 = Client::connect(&cluster.b, r#"{"type":"register","id":"p1","role":"patient"}"#).await;

    m1.send(r#"{"type":"handover","patientID":"p1"}"#).await;

    assert!(matches!(m1.recv().await, ServerMessage::HandoverFailed { .. }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    p1.assert_idle();
    assert_eq!(cluster.bus.published(), 0);
    cluster.stop();
}

#[tokio::test]
async fn test_offline_clinician_is_not_matched() {
    let cluster = Cluster::start().await;
    let mut m1 = Client::connect(&cluster.a, r#"{"type":"register","id":"m1","role":"doctor","level":"MO"}"#).await;
    let mut p1 = Client::connect(&cluster.b, r#"{"type":"register","id":"p1","role":"patient"}"#).await;

    m1.send(r#"{"type":"status","status":"offline"}"#).await;
    p1.send(r#"{"type":"call-request"}"#).await;

    assert_eq!(p1.recv().await, ServerMessage::NoDoctorAvailable);
    cluster.stop();
}
