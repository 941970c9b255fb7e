//! OSC control surface over loopback UDP

use maple::broadcast::EventBus;
use maple::control::Controller;
use maple::midi_output::NullOutput;
use maple::osc_server::{OscServer, ERROR_ADDR, EVENT_ADDR};
use maple::state::{self, AppState, SharedState};
use maple::store::StateStore;
use rosc::{OscMessage, OscPacket, OscType};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::time::timeout;

struct Harness {
    client: UdpSocket,
    server: SocketAddr,
    state: SharedState,
    _dir: TempDir,
}

async fn start() -> Harness {
    let dir = TempDir::new().unwrap();
    let state = state::shared(AppState::default());
    let bus = EventBus::default();
    let controller = Arc::new(Controller::new(
        state.clone(),
        StateStore::new(dir.path().join("maple_state.json")),
        Arc::new(bus.clone()),
        Arc::new(NullOutput),
    ));

    let server = OscServer::bind("127.0.0.1:0", controller, bus).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    Harness {
        client,
        server: addr,
        state,
        _dir: dir,
    }
}

impl Harness {
    async fn send(&self, addr: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let bytes = rosc::encoder::encode(&packet).unwrap();
        self.client.send_to(&bytes, self.server).await.unwrap();
    }

    async fn recv(&self) -> OscMessage {
        let mut buf = [0u8; 65536];
        let (size, _) = timeout(Duration::from_secs(2), self.client.recv_from(&mut buf))
            .await
            .expect("no reply within 2s")
            .unwrap();
        match rosc::decoder::decode_udp(&buf[..size]).unwrap().1 {
            OscPacket::Message(msg) => msg,
            OscPacket::Bundle(_) => panic!("unexpected bundle"),
        }
    }

    /// Next `/maple/event` payload as JSON
    async fn recv_event(&self) -> Value {
        let msg = self.recv().await;
        assert_eq!(msg.addr, EVENT_ADDR);
        match &msg.args[0] {
            OscType::String(text) => serde_json::from_str(text).unwrap(),
            other => panic!("unexpected argument {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_subscribe_receives_full_state() {
    let h = start().await;
    h.send("/subscribe", vec![]).await;

    let init = h.recv_event().await;
    assert_eq!(init["type"], "init");
    assert_eq!(init["state"]["tempo"], 120);
    assert_eq!(init["state"]["voices"].as_array().unwrap().len(), 5);
    assert_eq!(init["ports"], serde_json::json!([]));
}

#[tokio::test]
async fn test_tempo_change_is_applied_and_announced() {
    let h = start().await;
    h.send("/subscribe", vec![]).await;
    h.recv_event().await;

    h.send("/tempo", vec![OscType::Int(90)]).await;
    let event = h.recv_event().await;

    assert_eq!(event["type"], "global_update");
    assert_eq!(event["updates"]["tempo"], 90);
    assert_eq!(h.state.lock().unwrap().tempo, 90);
}

#[tokio::test]
async fn test_voice_field_update_is_announced() {
    let h = start().await;
    h.send("/subscribe", vec![]).await;
    h.recv_event().await;

    h.send(
        "/voice",
        vec![
            OscType::Int(2),
            OscType::String("division".into()),
            OscType::Float(3.0),
        ],
    )
    .await;
    let event = h.recv_event().await;

    assert_eq!(event["type"], "state_update");
    assert_eq!(event["voice"]["id"], 2);
    assert_eq!(event["voice"]["division"], 3.0);
    assert_eq!(h.state.lock().unwrap().voice(2).unwrap().division, 3.0);
}

#[tokio::test]
async fn test_invalid_update_gets_error_reply_and_changes_nothing() {
    let h = start().await;

    h.send(
        "/voice/json",
        vec![OscType::String(r#"{"id": 1, "channel": 99}"#.into())],
    )
    .await;
    let reply = h.recv().await;

    assert_eq!(reply.addr, ERROR_ADDR);
    assert_eq!(h.state.lock().unwrap().voice(1).unwrap().channel, 0);
}

#[tokio::test]
async fn test_unknown_voice_gets_error_reply() {
    let h = start().await;

    h.send(
        "/voice",
        vec![
            OscType::Int(42),
            OscType::String("active".into()),
            OscType::Bool(false),
        ],
    )
    .await;

    assert_eq!(h.recv().await.addr, ERROR_ADDR);
}

#[tokio::test]
async fn test_state_request_replies_without_subscribing() {
    let h = start().await;

    h.send("/state", vec![]).await;
    assert_eq!(h.recv_event().await["type"], "init");

    // not subscribed, so the next thing we hear is the reply to /state
    h.send("/play", vec![]).await;
    h.send("/state", vec![]).await;
    let snapshot = h.recv_event().await;
    assert_eq!(snapshot["type"], "init");
    assert_eq!(snapshot["state"]["playing"], true);
}

#[tokio::test]
async fn test_save_then_load_restores_state() {
    let h = start().await;

    h.send("/tempo", vec![OscType::Int(75)]).await;
    h.send("/save", vec![]).await;
    h.send("/tempo", vec![OscType::Int(140)]).await;
    h.send("/load", vec![]).await;
    h.send("/state", vec![]).await;

    let snapshot = h.recv_event().await;
    assert_eq!(snapshot["state"]["tempo"], 75);
}

#[tokio::test]
async fn test_load_without_saved_state_gets_error_reply() {
    let h = start().await;

    h.send("/load", vec![]).await;
    let reply = h.recv().await;

    assert_eq!(reply.addr, ERROR_ADDR);
    assert_eq!(h.state.lock().unwrap().tempo, 120);
}
