//! Phase scheduling
//!
//! Every active voice accumulates elapsed time in its `phase`. When the phase
//! reaches the voice's beat interval the surplus is kept (wrap, not clamp), so
//! the number of crossings over a stretch of time does not depend on how that
//! time was split into ticks. Phases are integer-nanosecond `Duration`s for
//! the same reason.
//!
//! Tempo is read fresh on every tick. A tempo change therefore reinterprets
//! the absolute phase against the new interval rather than preserving the
//! fraction of the beat already elapsed.

use crate::voice::Voice;
use std::time::{Duration, Instant};

/// Subdivisions below this are floored to keep the interval bounded
pub const MIN_DIVISION: f64 = 0.1;

/// Fraction of a beat a fired note sounds for
pub const DUTY_CYCLE: f64 = 0.8;

/// Length of one quarter-note beat
pub fn pulse_interval(tempo: u32) -> Duration {
    Duration::from_secs_f64(60.0 / tempo.max(1) as f64)
}

/// Length of one beat for a voice at this tempo and subdivision
pub fn beat_interval(tempo: u32, division: f64) -> Duration {
    let seconds = (60.0 / tempo.max(1) as f64) / division.max(MIN_DIVISION);
    let interval = if seconds.is_finite() {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    };
    interval.max(Duration::from_nanos(1))
}

/// A beat boundary reached during one advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    /// Beat interval in force when the boundary was reached
    pub interval: Duration,
    /// Boundaries passed; more than one only when `dt` spans several beats
    pub beats: u32,
}

/// Advance a voice by `dt`, reporting a crossing if the phase wrapped
pub fn advance(voice: &mut Voice, tempo: u32, dt: Duration) -> Option<Crossing> {
    let interval = beat_interval(tempo, voice.division);
    let phase = voice.phase + dt;

    if phase >= interval {
        let (nanos, period) = (phase.as_nanos(), interval.as_nanos());
        voice.phase = Duration::from_nanos((nanos % period) as u64);
        Some(Crossing {
            interval,
            beats: u32::try_from(nanos / period).unwrap_or(u32::MAX),
        })
    } else {
        voice.phase = phase;
        None
    }
}

/// Free-running tempo reference, one pulse per beat of the global tempo
#[derive(Debug, Clone, Default)]
pub struct StemPulse {
    last: Option<Instant>,
}

impl StemPulse {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Forget the last pulse so the next poll fires immediately
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<Instant> {
        self.last
    }

    /// Returns true (and restarts the interval) when a pulse is due
    pub fn poll(&mut self, now: Instant, tempo: u32) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= pulse_interval(tempo),
        };
        if due {
            self.last = Some(now);
        }
        due
    }
}
