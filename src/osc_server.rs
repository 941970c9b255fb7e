//! OSC control surface
//!
//! Listens on UDP (port 7770 by default) and turns OSC messages into
//! [`Command`]s:
//!
//! | address        | arguments                  |
//! |----------------|----------------------------|
//! | `/play`        | optional bool/int          |
//! | `/stop`        |                            |
//! | `/tempo`       | bpm                        |
//! | `/scale`       | pitch...                   |
//! | `/port`        | output port index          |
//! | `/voice`       | id, field name, value      |
//! | `/voice/json`  | JSON object with `id`      |
//! | `/global/json` | JSON global update         |
//! | `/apply`       | full state JSON            |
//! | `/save`        |                            |
//! | `/load`        |                            |
//! | `/state`       | reply with the full state  |
//! | `/subscribe`   |                            |
//! | `/unsubscribe` |                            |
//!
//! Subscribers receive every broadcast event as `/maple/event` with the JSON
//! payload as its only argument. Rejected messages are answered with
//! `/maple/error`.

use crate::broadcast::{BroadcastEvent, EventBus};
use crate::control::{voice_field, Command, Controller, Param};
use crate::error::{MapleError, MapleResult};
use crate::state::{AppState, GlobalUpdate};
use crate::voice::VoiceUpdate;
use rosc::{OscMessage, OscPacket, OscType};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

pub const EVENT_ADDR: &str = "/maple/event";
pub const ERROR_ADDR: &str = "/maple/error";

/// A decoded control message
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Command(Command),
    /// Single voice field by name; resolved against the voice's current state
    VoiceField { id: u32, field: String, value: Param },
    Snapshot,
    Subscribe,
    Unsubscribe,
}

fn param(arg: &OscType) -> Option<Param> {
    match arg {
        OscType::Int(i) => Some(Param::Int(*i as i64)),
        OscType::Long(l) => Some(Param::Int(*l)),
        OscType::Float(f) => Some(Param::Float(*f as f64)),
        OscType::Double(d) => Some(Param::Float(*d)),
        OscType::String(s) => Some(Param::Str(s.clone())),
        OscType::Bool(b) => Some(Param::Bool(*b)),
        _ => None,
    }
}

fn int_arg(msg: &OscMessage, index: usize) -> MapleResult<i64> {
    match msg.args.get(index).and_then(param) {
        Some(Param::Int(i)) => Ok(i),
        Some(Param::Float(f)) if f.fract() == 0.0 => Ok(f as i64),
        _ => Err(MapleError::BadMessage(format!(
            "{} expects an integer argument at position {}",
            msg.addr, index
        ))),
    }
}

fn string_arg(msg: &OscMessage, index: usize) -> MapleResult<&str> {
    match msg.args.get(index) {
        Some(OscType::String(s)) => Ok(s),
        _ => Err(MapleError::BadMessage(format!(
            "{} expects a string argument at position {}",
            msg.addr, index
        ))),
    }
}

/// Split a JSON voice update into its id and the remaining fields
fn parse_voice_json(text: &str) -> MapleResult<(u32, VoiceUpdate)> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| MapleError::BadMessage("voice update must be a JSON object".into()))?;
    let id = object
        .remove("id")
        .and_then(|id| id.as_u64())
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| MapleError::BadMessage("voice update needs a numeric 'id'".into()))?;
    let update = serde_json::from_value(value)?;
    Ok((id, update))
}

/// Decode one OSC message into a request
pub fn parse_message(msg: &OscMessage) -> MapleResult<Request> {
    let request = match msg.addr.as_str() {
        "/play" => {
            let playing = match msg.args.first().and_then(param) {
                None => true,
                Some(Param::Bool(b)) => b,
                Some(Param::Int(i)) => i != 0,
                Some(Param::Float(f)) => f != 0.0,
                Some(Param::Str(s)) => s != "false" && s != "0",
            };
            Request::Command(Command::play(playing))
        }
        "/stop" => Request::Command(Command::play(false)),
        "/tempo" => {
            let bpm = int_arg(msg, 0)?;
            let bpm = u32::try_from(bpm)
                .map_err(|_| MapleError::invalid("tempo", format!("{} is not a tempo", bpm)))?;
            Request::Command(Command::tempo(bpm))
        }
        "/scale" => {
            let pitches = (0..msg.args.len())
                .map(|i| {
                    let p = int_arg(msg, i)?;
                    u8::try_from(p)
                        .ok()
                        .filter(|p| *p <= 127)
                        .ok_or_else(|| MapleError::invalid("scale", format!("{} is not a MIDI pitch", p)))
                })
                .collect::<MapleResult<Vec<u8>>>()?;
            Request::Command(Command::scale(pitches))
        }
        "/port" => {
            let index = int_arg(msg, 0)?;
            let index = usize::try_from(index)
                .map_err(|_| MapleError::invalid("selected_midi_port", "negative index"))?;
            Request::Command(Command::port(index))
        }
        "/voice" => {
            let id = int_arg(msg, 0)?;
            let id = u32::try_from(id)
                .map_err(|_| MapleError::invalid("id", format!("{} is not a voice id", id)))?;
            let field = string_arg(msg, 1)?.to_string();
            let value = msg
                .args
                .get(2)
                .and_then(param)
                .ok_or_else(|| MapleError::BadMessage("/voice expects a value".into()))?;
            Request::VoiceField { id, field, value }
        }
        "/voice/json" => {
            let (id, update) = parse_voice_json(string_arg(msg, 0)?)?;
            Request::Command(Command::Voice { id, update })
        }
        "/global/json" => {
            let update: GlobalUpdate = serde_json::from_str(string_arg(msg, 0)?)?;
            Request::Command(Command::Global(update))
        }
        "/apply" => {
            let state: AppState = serde_json::from_str(string_arg(msg, 0)?)?;
            Request::Command(Command::Replace(Box::new(state)))
        }
        "/save" => Request::Command(Command::Save),
        "/load" => Request::Command(Command::Load),
        "/state" => Request::Snapshot,
        "/subscribe" => Request::Subscribe,
        "/unsubscribe" => Request::Unsubscribe,
        other => return Err(MapleError::BadMessage(format!("Unknown OSC address: {}", other))),
    };
    Ok(request)
}

/// Wrap a broadcast event for OSC delivery
pub fn event_packet(event: &BroadcastEvent) -> MapleResult<Vec<u8>> {
    let packet = OscPacket::Message(OscMessage {
        addr: EVENT_ADDR.to_string(),
        args: vec![OscType::String(event.to_json()?)],
    });
    rosc::encoder::encode(&packet).map_err(|e| MapleError::BadMessage(format!("{:?}", e)))
}

fn error_packet(err: &MapleError) -> MapleResult<Vec<u8>> {
    let packet = OscPacket::Message(OscMessage {
        addr: ERROR_ADDR.to_string(),
        args: vec![OscType::String(err.to_string())],
    });
    rosc::encoder::encode(&packet).map_err(|e| MapleError::BadMessage(format!("{:?}", e)))
}

type Subscribers = Arc<Mutex<HashSet<SocketAddr>>>;

pub struct OscServer {
    socket: Arc<UdpSocket>,
    controller: Arc<Controller>,
    bus: EventBus,
    subscribers: Subscribers,
}

impl OscServer {
    pub async fn bind(addr: &str, controller: Arc<Controller>, bus: EventBus) -> MapleResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("OSC control listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            controller,
            bus,
            subscribers: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn local_addr(&self) -> MapleResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until the socket fails
    pub async fn run(self) -> MapleResult<()> {
        tokio::spawn(forward_events(
            self.bus.subscribe(),
            Arc::clone(&self.socket),
            Arc::clone(&self.subscribers),
        ));

        let mut buf = [0u8; 65536];
        loop {
            let (size, from) = self.socket.recv_from(&mut buf).await?;
            debug!("Received {} bytes from {}", size, from);

            match rosc::decoder::decode_udp(&buf[..size]) {
                Ok((_, packet)) => self.handle_packet(packet, from).await,
                Err(e) => error!("Failed to decode OSC packet: {:?}", e),
            }
        }
    }

    async fn handle_packet(&self, packet: OscPacket, from: SocketAddr) {
        match packet {
            OscPacket::Message(msg) => {
                if let Err(e) = self.handle_message(&msg, from).await {
                    warn!("Rejected {} from {}: {}", msg.addr, from, e);
                    self.reply_error(&e, from).await;
                }
            }
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    Box::pin(self.handle_packet(packet, from)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: &OscMessage, from: SocketAddr) -> MapleResult<()> {
        debug!("OSC message: {} with {} args", msg.addr, msg.args.len());

        match parse_message(msg)? {
            Request::Command(command @ (Command::Save | Command::Load)) => {
                // file I/O stays off the runtime workers
                let controller = Arc::clone(&self.controller);
                tokio::task::spawn_blocking(move || controller.apply(command))
                    .await
                    .map_err(|e| MapleError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
            }
            Request::Command(command) => self.controller.apply(command),
            Request::VoiceField { id, field, value } => {
                let range = self.controller.velocity_range(id)?;
                let update = voice_field(&field, &value, range)?;
                self.controller.apply(Command::Voice { id, update })
            }
            Request::Snapshot => {
                let snapshot = self.controller.snapshot()?;
                self.socket.send_to(&event_packet(&snapshot)?, from).await?;
                Ok(())
            }
            Request::Subscribe => {
                self.lock_subscribers()?.insert(from);
                info!("{} subscribed", from);
                let snapshot = self.controller.snapshot()?;
                self.socket.send_to(&event_packet(&snapshot)?, from).await?;
                Ok(())
            }
            Request::Unsubscribe => {
                self.lock_subscribers()?.remove(&from);
                info!("{} unsubscribed", from);
                Ok(())
            }
        }
    }

    fn lock_subscribers(&self) -> MapleResult<std::sync::MutexGuard<'_, HashSet<SocketAddr>>> {
        self.subscribers.lock().map_err(|_| MapleError::StatePoisoned)
    }

    async fn reply_error(&self, err: &MapleError, to: SocketAddr) {
        match error_packet(err) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to).await {
                    debug!("Could not send error reply to {}: {}", to, e);
                }
            }
            Err(e) => debug!("Could not encode error reply: {}", e),
        }
    }
}

/// Forward bus events to every subscribed peer. Delivery is best effort.
async fn forward_events(
    mut rx: tokio::sync::broadcast::Receiver<BroadcastEvent>,
    socket: Arc<UdpSocket>,
    subscribers: Subscribers,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event forwarder lagged; skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let targets: Vec<SocketAddr> = match subscribers.lock() {
            Ok(set) => set.iter().copied().collect(),
            Err(_) => break,
        };
        if targets.is_empty() {
            continue;
        }

        let bytes = match event_packet(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Could not encode event: {}", e);
                continue;
            }
        };
        for target in targets {
            if let Err(e) = socket.send_to(&bytes, target).await {
                debug!("Event delivery to {} failed: {}", target, e);
            }
        }
    }
    debug!("Event forwarder stopped");
}
