//! MIDI output
//!
//! The transport only sees the [`OutputSink`] trait. [`MidiPortOutput`] binds it
//! to a midir connection: a virtual port named "Maple Output" where the
//! platform supports one, otherwise the first hardware port. [`NullOutput`]
//! swallows everything and is used when no device can be opened.

use crate::error::{MapleError, MapleResult};
use crate::voice::MAX_CHANNEL;
use midir::{MidiOutput, MidiOutputConnection};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Controller numbers used by [`OutputSink::all_notes_off`]
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_ALL_NOTES_OFF: u8 = 123;

const CLIENT_NAME: &str = "Maple";
const VIRTUAL_PORT_NAME: &str = "Maple Output";

/// Channel messages the engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
}

impl MidiMessage {
    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => [0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
        }
    }
}

/// Destination for note and control messages.
///
/// Implementations must be cheap to call tens of times per second and must
/// report device errors as `Err` rather than panicking.
pub trait OutputSink: Send + Sync {
    fn send(&self, msg: MidiMessage) -> MapleResult<()>;

    fn send_note_on(&self, channel: u8, pitch: u8, velocity: u8) -> MapleResult<()> {
        self.send(MidiMessage::NoteOn {
            channel,
            note: pitch,
            velocity,
        })
    }

    fn send_note_off(&self, channel: u8, pitch: u8) -> MapleResult<()> {
        self.send(MidiMessage::NoteOff {
            channel,
            note: pitch,
            velocity: 0,
        })
    }

    fn send_control(&self, channel: u8, controller: u8, value: u8) -> MapleResult<()> {
        self.send(MidiMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }

    /// Silence every channel. Keeps going past individual failures and
    /// returns the last one.
    fn all_notes_off(&self) -> MapleResult<()> {
        let mut result = Ok(());
        for channel in 0..=MAX_CHANNEL {
            for controller in [CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF] {
                if let Err(e) = self.send_control(channel, controller, 0) {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Device enumeration and switching, driven by the control surface
pub trait PortControl: Send + Sync {
    fn port_names(&self) -> Vec<String>;
    fn open_port(&self, index: usize) -> MapleResult<String>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl OutputSink for NullOutput {
    fn send(&self, _msg: MidiMessage) -> MapleResult<()> {
        Ok(())
    }
}

impl PortControl for NullOutput {
    fn port_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn open_port(&self, index: usize) -> MapleResult<String> {
        Err(MapleError::MidiConnect(format!(
            "port index {} invalid (no MIDI backend)",
            index
        )))
    }
}

struct Connection {
    conn: MidiOutputConnection,
    name: String,
}

/// midir-backed output with runtime port switching
pub struct MidiPortOutput {
    connection: Mutex<Option<Connection>>,
}

impl MidiPortOutput {
    /// Open the default output: virtual port first, then the first hardware port
    pub fn open_default() -> Self {
        let output = Self {
            connection: Mutex::new(None),
        };
        if let Err(e) = output.open_fallback() {
            warn!("No MIDI output available: {}", e);
        }
        output
    }

    /// Names of the hardware output ports, in index order
    pub fn list_ports() -> MapleResult<Vec<String>> {
        let midi_out = new_client()?;
        midi_out
            .ports()
            .iter()
            .map(|p| {
                midi_out
                    .port_name(p)
                    .map_err(|e| MapleError::MidiInit(e.to_string()))
            })
            .collect()
    }

    /// Name of the currently open port, if any
    pub fn active_port_name(&self) -> Option<String> {
        self.connection
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|c| c.name.clone()))
    }

    /// Switch to hardware port `index`. On failure the default output is
    /// reopened and the error is returned.
    pub fn open_port(&self, index: usize) -> MapleResult<String> {
        info!("Switching MIDI output to port index {}", index);
        self.close();

        match connect_hardware(index) {
            Ok(connection) => {
                let name = connection.name.clone();
                self.install(connection)?;
                info!("Switched to hardware port: {}", name);
                Ok(name)
            }
            Err(e) => {
                error!("Failed to switch port: {}. Falling back to default output", e);
                if let Err(fallback) = self.open_fallback() {
                    warn!("Fallback output unavailable: {}", fallback);
                }
                Err(e)
            }
        }
    }

    /// Match a port by (partial) name, like `--midi-port "IAC"`
    pub fn open_named(&self, name: &str) -> MapleResult<String> {
        let index = Self::list_ports()?
            .iter()
            .position(|p| p.contains(name))
            .ok_or_else(|| MapleError::MidiConnect(format!("MIDI device '{}' not found", name)))?;
        self.open_port(index)
    }

    pub fn close(&self) {
        if let Ok(mut guard) = self.connection.lock() {
            if let Some(connection) = guard.take() {
                connection.conn.close();
            }
        }
    }

    fn install(&self, connection: Connection) -> MapleResult<()> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| MapleError::MidiConnect("output lock poisoned".into()))?;
        *guard = Some(connection);
        Ok(())
    }

    fn open_fallback(&self) -> MapleResult<()> {
        let connection = match connect_virtual() {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Could not open virtual port: {}", e);
                connect_hardware(0)?
            }
        };
        info!("MIDI output ready: {}", connection.name);
        self.install(connection)
    }
}

impl OutputSink for MidiPortOutput {
    fn send(&self, msg: MidiMessage) -> MapleResult<()> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| MapleError::MidiSend("output lock poisoned".into()))?;
        let connection = guard.as_mut().ok_or(MapleError::NotConnected)?;
        connection
            .conn
            .send(&msg.to_bytes())
            .map_err(|e| MapleError::MidiSend(e.to_string()))
    }
}

impl PortControl for MidiPortOutput {
    fn port_names(&self) -> Vec<String> {
        Self::list_ports().unwrap_or_else(|e| {
            warn!("Could not list MIDI ports: {}", e);
            Vec::new()
        })
    }

    fn open_port(&self, index: usize) -> MapleResult<String> {
        MidiPortOutput::open_port(self, index)
    }
}

impl Drop for MidiPortOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn new_client() -> MapleResult<MidiOutput> {
    MidiOutput::new(CLIENT_NAME).map_err(|e| MapleError::MidiInit(e.to_string()))
}

fn connect_hardware(index: usize) -> MapleResult<Connection> {
    let midi_out = new_client()?;
    let ports = midi_out.ports();
    let port = ports.get(index).ok_or_else(|| {
        MapleError::MidiConnect(format!(
            "port index {} invalid ({} ports available)",
            index,
            ports.len()
        ))
    })?;
    let name = midi_out
        .port_name(port)
        .map_err(|e| MapleError::MidiConnect(e.to_string()))?;
    let conn = midi_out
        .connect(port, "maple-output")
        .map_err(|e| MapleError::MidiConnect(e.to_string()))?;
    Ok(Connection { conn, name })
}

#[cfg(unix)]
fn connect_virtual() -> MapleResult<Connection> {
    use midir::os::unix::VirtualOutput;

    let midi_out = new_client()?;
    let conn = midi_out
        .create_virtual(VIRTUAL_PORT_NAME)
        .map_err(|e| MapleError::MidiConnect(e.to_string()))?;
    Ok(Connection {
        conn,
        name: format!("{} (Virtual)", VIRTUAL_PORT_NAME),
    })
}

#[cfg(not(unix))]
fn connect_virtual() -> MapleResult<Connection> {
    Err(MapleError::MidiConnect(format!(
        "virtual port '{}' not supported on this platform",
        VIRTUAL_PORT_NAME
    )))
}
