//! Note events produced on beat crossings

use crate::scale::select_candidates;
use crate::scheduler::DUTY_CYCLE;
use crate::voice::Voice;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A fired note, consumed once by the output and the note-off scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub voice_id: u32,
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
    pub duration: Duration,
}

/// Decide whether a voice sounds on this beat and, if so, what it plays.
///
/// Returns `None` when the register leaves no candidates or the probability
/// draw misses.
pub fn fire<R: Rng>(
    voice: &Voice,
    interval: Duration,
    scale: &[u8],
    rng: &mut R,
) -> Option<NoteEvent> {
    let candidates = select_candidates(scale, voice.register);
    if candidates.is_empty() {
        return None;
    }

    let r: f64 = rng.gen();
    if r >= voice.probability {
        return None;
    }

    let base = *candidates.choose(rng)?;
    let pitch = (base as i32 + voice.transpose).clamp(0, 127) as u8;
    let range = voice.velocity_range;
    let velocity = rng.gen_range(range.min..=range.max.max(range.min));

    Some(NoteEvent {
        voice_id: voice.id,
        channel: voice.channel,
        pitch,
        velocity,
        duration: interval.mul_f64(DUTY_CYCLE),
    })
}
