//! # Maple - multi-voice pulse generator
//!
//! Maple drives a set of independently configured voices from one shared
//! tempo. On every beat a voice may fire a note drawn from the global scale;
//! the note-on goes straight to a MIDI output and its note-off follows after
//! 80% of the beat. Observers are told about every beat and every
//! configuration change.
//!
//! ## Architecture
//!
//! - [`voice`] - voice configuration, phase state and validated updates
//! - [`scale`] - register filtering of the global scale
//! - [`scheduler`] - phase accumulation, beat crossings and the stem pulse
//! - [`generator`] - probabilistic note selection on a beat crossing
//! - [`engine`] - one tick over all voices, engine reset
//! - [`lifecycle`] - note-on now, note-off later
//! - [`transport`] - the Idle/Running loop that ties it together
//! - [`midi_output`], [`broadcast`] - output and observer sinks
//! - [`control`], [`osc_server`] - configuration changes from outside
//! - [`state`], [`store`], [`config`] - shared state, persistence, settings
//!
//! ## Example
//!
//! ```rust
//! use maple::engine::{EngineEvent, PulseEngine};
//! use maple::voice::Voice;
//! use std::time::{Duration, Instant};
//!
//! let start = Instant::now();
//! let mut engine = PulseEngine::seeded(start, 7);
//! let mut voice = Voice::new(0, "Center");
//! voice.probability = 1.0;
//! let mut voices = vec![voice];
//! engine.reset(start, &mut voices);
//!
//! // 120 BPM quarter notes: two beats in one second
//! let notes = (1..=50)
//!     .flat_map(|k| engine.tick(start + Duration::from_millis(20 * k), 120, &mut voices, &[60]))
//!     .filter(|e| matches!(e, EngineEvent::Note(_)))
//!     .count();
//! assert_eq!(notes, 2);
//! ```

pub mod broadcast;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod generator;
pub mod lifecycle;
pub mod midi_output;
pub mod osc_server;
pub mod scale;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod transport;
pub mod voice;

pub use error::{MapleError, MapleResult};
