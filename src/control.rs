//! Configuration commands from outside the transport loop
//!
//! Every change to the live state goes through [`Controller::apply`]: the
//! command is validated against the closed field set, applied under the state
//! lock, and the result is announced on the broadcast sink. Stopping playback
//! only flips `playing`; silencing the output is the transport loop's job.

use crate::broadcast::{BroadcastEvent, BroadcastSink};
use crate::error::{MapleError, MapleResult};
use crate::midi_output::PortControl;
use crate::state::{self, AppState, GlobalUpdate, SharedState};
use crate::store::StateStore;
use crate::voice::{Register, VelocityRange, VoiceUpdate};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Global(GlobalUpdate),
    Voice { id: u32, update: VoiceUpdate },
    Save,
    Load,
    /// Replace the whole document; `playing` is kept as it is
    Replace(Box<AppState>),
}

impl Command {
    pub fn play(playing: bool) -> Self {
        Command::Global(GlobalUpdate {
            playing: Some(playing),
            ..Default::default()
        })
    }

    pub fn tempo(bpm: u32) -> Self {
        Command::Global(GlobalUpdate {
            tempo: Some(bpm),
            ..Default::default()
        })
    }

    pub fn scale(pitches: Vec<u8>) -> Self {
        Command::Global(GlobalUpdate {
            scale: Some(pitches),
            ..Default::default()
        })
    }

    pub fn port(index: usize) -> Self {
        Command::Global(GlobalUpdate {
            selected_midi_port: Some(index),
            ..Default::default()
        })
    }
}

/// Loosely typed value from a control message
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Param {
    fn as_f64(&self, field: &'static str) -> MapleResult<f64> {
        match self {
            Param::Int(i) => Ok(*i as f64),
            Param::Float(f) => Ok(*f),
            Param::Str(s) => s
                .parse()
                .map_err(|_| MapleError::invalid(field, format!("'{}' is not a number", s))),
            Param::Bool(_) => Err(MapleError::invalid(field, "expected a number")),
        }
    }

    fn as_i64(&self, field: &'static str) -> MapleResult<i64> {
        match self {
            Param::Int(i) => Ok(*i),
            Param::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            Param::Str(s) => s
                .parse()
                .map_err(|_| MapleError::invalid(field, format!("'{}' is not an integer", s))),
            _ => Err(MapleError::invalid(field, "expected an integer")),
        }
    }

    fn as_u8(&self, field: &'static str) -> MapleResult<u8> {
        let value = self.as_i64(field)?;
        u8::try_from(value).map_err(|_| MapleError::invalid(field, format!("{} out of range", value)))
    }

    fn as_bool(&self, field: &'static str) -> MapleResult<bool> {
        match self {
            Param::Bool(b) => Ok(*b),
            Param::Int(i) => Ok(*i != 0),
            Param::Float(f) => Ok(*f != 0.0),
            Param::Str(s) => match s.as_str() {
                "true" | "on" | "1" => Ok(true),
                "false" | "off" | "0" => Ok(false),
                _ => Err(MapleError::invalid(field, format!("'{}' is not a boolean", s))),
            },
        }
    }

    fn as_string(&self) -> String {
        match self {
            Param::Bool(b) => b.to_string(),
            Param::Int(i) => i.to_string(),
            Param::Float(f) => f.to_string(),
            Param::Str(s) => s.clone(),
        }
    }
}

/// Build a single-field voice update from a field name and raw value.
///
/// `velocity_min` / `velocity_max` adjust one bound of the current range,
/// so the caller passes the voice's present range.
pub fn voice_field(name: &str, value: &Param, current: VelocityRange) -> MapleResult<VoiceUpdate> {
    let mut update = VoiceUpdate::default();
    match name {
        "name" => update.name = Some(value.as_string()),
        "active" => update.active = Some(value.as_bool("active")?),
        "channel" | "instrument_channel" => update.channel = Some(value.as_u8("channel")?),
        "division" => update.division = Some(value.as_f64("division")?),
        "probability" => update.probability = Some(value.as_f64("probability")?),
        "transpose" => {
            let t = value.as_i64("transpose")?;
            update.transpose =
                Some(i32::try_from(t).map_err(|_| MapleError::invalid("transpose", "out of range"))?);
        }
        "register" => update.register = Some(value.as_string().parse::<Register>()?),
        "velocity_min" => {
            let min = value.as_u8("velocity_min")?;
            update.velocity_range = Some(VelocityRange::new(min, current.max.max(min))?);
        }
        "velocity_max" => {
            let max = value.as_u8("velocity_max")?;
            update.velocity_range = Some(VelocityRange::new(current.min.min(max), max)?);
        }
        other => return Err(MapleError::UnknownField(other.to_string())),
    }
    Ok(update)
}

/// Applies commands to the shared state and announces the results
pub struct Controller {
    state: SharedState,
    store: StateStore,
    bus: Arc<dyn BroadcastSink>,
    ports: Arc<dyn PortControl>,
}

impl Controller {
    pub fn new(
        state: SharedState,
        store: StateStore,
        bus: Arc<dyn BroadcastSink>,
        ports: Arc<dyn PortControl>,
    ) -> Self {
        Self {
            state,
            store,
            bus,
            ports,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Full-state event for a newly connected observer
    pub fn snapshot(&self) -> MapleResult<BroadcastEvent> {
        let state = state::lock(&self.state)?.clone();
        Ok(BroadcastEvent::Init {
            state,
            ports: self.ports.port_names(),
        })
    }

    /// Current range of a voice, for single-bound velocity edits
    pub fn velocity_range(&self, id: u32) -> MapleResult<VelocityRange> {
        state::lock(&self.state)?
            .voice(id)
            .map(|v| v.velocity_range)
            .ok_or(MapleError::UnknownVoice(id))
    }

    pub fn apply(&self, command: Command) -> MapleResult<()> {
        match command {
            Command::Global(update) => self.update_global(update),
            Command::Voice { id, update } => {
                let voice = state::lock(&self.state)?.update_voice(id, &update)?;
                info!("Updated voice {}", voice.id);
                self.bus.publish(BroadcastEvent::StateUpdate { voice });
                Ok(())
            }
            Command::Save => {
                let snapshot = state::lock(&self.state)?.clone();
                self.store.save(&snapshot)
            }
            Command::Load => {
                let loaded = self.store.load()?;
                self.replace(loaded)
            }
            Command::Replace(state) => {
                let mut state = *state;
                state.sanitize();
                self.replace(state)
            }
        }
    }

    fn update_global(&self, update: GlobalUpdate) -> MapleResult<()> {
        info!("Global update: {:?}", update);
        let applied = state::lock(&self.state)?.update_global(&update)?;

        if let Some(index) = applied.selected_midi_port {
            self.switch_port(index);
        }
        if applied.playing == Some(false) {
            info!("Playback stop requested");
        }
        self.bus
            .publish(BroadcastEvent::GlobalUpdate { updates: applied });
        Ok(())
    }

    fn replace(&self, mut incoming: AppState) -> MapleResult<()> {
        let previous_port = {
            let mut current = state::lock(&self.state)?;
            incoming.playing = current.playing;
            // live phases survive a replace; only the transport resets them
            for voice in &mut incoming.voices {
                if let Some(live) = current.voice(voice.id) {
                    voice.phase = live.phase;
                }
            }
            let previous = current.selected_midi_port;
            *current = incoming.clone();
            previous
        };
        info!("State replaced ({} voices)", incoming.voices.len());

        if incoming.selected_midi_port != previous_port {
            self.switch_port(incoming.selected_midi_port);
        }
        self.bus.publish(BroadcastEvent::Init {
            state: incoming,
            ports: self.ports.port_names(),
        });
        Ok(())
    }

    fn switch_port(&self, index: usize) {
        match self.ports.open_port(index) {
            Ok(name) => info!("MIDI output switched to {}", name),
            Err(e) => warn!("MIDI port switch to {} failed: {}", index, e),
        }
    }
}
