//! Shared transport state
//!
//! `AppState` is the single document both the transport loop and the control
//! surface work on. It lives behind one mutex; the loop holds the lock only
//! for the duration of an engine tick.

use crate::error::{MapleError, MapleResult};
use crate::scale::{self, DEFAULT_SCALE};
use crate::voice::{Voice, VoiceUpdate};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Highest accepted tempo in BPM
pub const MAX_TEMPO: u32 = 999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    pub tempo: u32,
    pub selected_midi_port: usize,
    #[serde(alias = "lobes")]
    pub voices: Vec<Voice>,
    #[serde(rename = "selected_notes")]
    pub scale: Vec<u8>,
    pub playing: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            tempo: 120,
            selected_midi_port: 0,
            voices: Voice::default_set(),
            scale: DEFAULT_SCALE.to_vec(),
            playing: false,
        }
    }
}

impl AppState {
    pub fn voice(&self, id: u32) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn voice_mut(&mut self, id: u32) -> Option<&mut Voice> {
        self.voices.iter_mut().find(|v| v.id == id)
    }

    /// Apply a validated update to one voice and return its new configuration
    pub fn update_voice(&mut self, id: u32, update: &VoiceUpdate) -> MapleResult<Voice> {
        let voice = self.voice_mut(id).ok_or(MapleError::UnknownVoice(id))?;
        voice.apply(update)?;
        Ok(voice.clone())
    }

    /// Apply a global update. Returns the update as applied (after normalization).
    pub fn update_global(&mut self, update: &GlobalUpdate) -> MapleResult<GlobalUpdate> {
        let mut applied = update.clone();

        if let Some(tempo) = update.tempo {
            validate_tempo(tempo)?;
        }
        let scale = update
            .scale
            .as_ref()
            .map(|pitches| scale::normalize(pitches.iter().map(|p| *p as i64)));

        if let Some(tempo) = update.tempo {
            self.tempo = tempo;
        }
        if let Some(scale) = scale {
            applied.scale = Some(scale.clone());
            self.scale = scale;
        }
        if let Some(playing) = update.playing {
            self.playing = playing;
        }
        if let Some(port) = update.selected_midi_port {
            self.selected_midi_port = port;
        }
        Ok(applied)
    }

    /// Bring a loaded document into a state the engine can run safely
    pub fn sanitize(&mut self) {
        self.tempo = self.tempo.clamp(1, MAX_TEMPO);
        self.scale = scale::normalize(self.scale.iter().map(|p| *p as i64));
        for voice in &mut self.voices {
            voice.sanitize();
        }
        self.voices.sort_by_key(|v| v.id);
        self.voices.dedup_by_key(|v| v.id);
    }
}

fn validate_tempo(tempo: u32) -> MapleResult<()> {
    if tempo == 0 || tempo > MAX_TEMPO {
        return Err(MapleError::invalid(
            "tempo",
            format!("must be 1..={} BPM, got {}", MAX_TEMPO, tempo),
        ));
    }
    Ok(())
}

/// Partial change to the transport-wide settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_midi_port: Option<usize>,
    #[serde(
        default,
        rename = "selected_notes",
        skip_serializing_if = "Option::is_none"
    )]
    pub scale: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playing: Option<bool>,
}

/// Shared handle to the live state
pub type SharedState = Arc<Mutex<AppState>>;

pub fn shared(state: AppState) -> SharedState {
    Arc::new(Mutex::new(state))
}

/// Lock shared state, mapping poisoning to an error the caller can contain
pub fn lock(state: &SharedState) -> MapleResult<MutexGuard<'_, AppState>> {
    state.lock().map_err(|_| MapleError::StatePoisoned)
}
