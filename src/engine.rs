//! Pulse engine: one tick over the stem pulse and every voice
//!
//! The engine owns the tick clock (`last_tick`), the stem pulse timer and
//! the random source. It never touches I/O; the transport loop routes the
//! events it returns.

use crate::generator::{fire, NoteEvent};
use crate::scheduler::{advance, StemPulse};
use crate::voice::Voice;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tracing::{debug, info};

/// Output of one engine tick, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Tempo reference, independent of any voice
    StemPulse { at: Instant },
    Note(NoteEvent),
}

pub struct PulseEngine<R = StdRng> {
    last_tick: Instant,
    stem: StemPulse,
    rng: R,
}

impl PulseEngine<StdRng> {
    pub fn new(now: Instant) -> Self {
        Self::with_rng(now, StdRng::from_entropy())
    }

    /// Deterministic engine for reproducible runs
    pub fn seeded(now: Instant, seed: u64) -> Self {
        Self::with_rng(now, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> PulseEngine<R> {
    pub fn with_rng(now: Instant, rng: R) -> Self {
        Self {
            last_tick: now,
            stem: StemPulse::new(),
            rng,
        }
    }

    pub fn last_tick(&self) -> Instant {
        self.last_tick
    }

    pub fn last_pulse(&self) -> Option<Instant> {
        self.stem.last()
    }

    /// Zero every phase and the pulse timer for a clean start
    pub fn reset(&mut self, now: Instant, voices: &mut [Voice]) {
        self.last_tick = now;
        self.stem.reset();
        for voice in voices.iter_mut() {
            voice.phase = std::time::Duration::ZERO;
        }
        info!("Engine reset");
    }

    /// Keep the tick clock current while stopped so resuming sees no gap
    pub fn hold(&mut self, now: Instant) {
        self.last_tick = now;
    }

    /// Advance everything to `now`.
    ///
    /// Events come back stem pulse first, then notes in ascending voice id.
    pub fn tick(
        &mut self,
        now: Instant,
        tempo: u32,
        voices: &mut [Voice],
        scale: &[u8],
    ) -> Vec<EngineEvent> {
        let dt = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        let mut events = Vec::new();
        if self.stem.poll(now, tempo) {
            events.push(EngineEvent::StemPulse { at: now });
        }

        let mut order: Vec<usize> = (0..voices.len()).collect();
        order.sort_by_key(|&i| voices[i].id);

        for i in order {
            let voice = &mut voices[i];
            if !voice.active {
                continue;
            }
            let Some(crossing) = advance(voice, tempo, dt) else {
                continue;
            };
            if crossing.beats > 1 {
                debug!(
                    "Voice {} crossed {} beats in one tick; firing once",
                    voice.id, crossing.beats
                );
            }
            if let Some(note) = fire(voice, crossing.interval, scale, &mut self.rng) {
                events.push(EngineEvent::Note(note));
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn certain_voice(id: u32) -> Voice {
        let mut voice = Voice::new(id, format!("v{}", id));
        voice.probability = 1.0;
        voice
    }

    fn notes(events: &[EngineEvent]) -> Vec<&NoteEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Note(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    fn run(
        engine: &mut PulseEngine,
        start: Instant,
        ticks: u32,
        step: Duration,
        tempo: u32,
        voices: &mut [Voice],
        scale: &[u8],
    ) -> Vec<EngineEvent> {
        (1..=ticks)
            .flat_map(|k| engine.tick(start + step * k, tempo, voices, scale))
            .collect()
    }

    #[test]
    fn test_four_quarter_notes_in_two_seconds() {
        let start = Instant::now();
        let mut engine = PulseEngine::seeded(start, 1);
        let mut voices = vec![certain_voice(0)];
        engine.reset(start, &mut voices);

        let events = run(&mut engine, start, 100, Duration::from_millis(20), 120, &mut voices, &[60]);
        let fired = notes(&events);

        assert_eq!(fired.len(), 4);
        assert!(fired.iter().all(|n| n.pitch == 60));
    }

    #[test]
    fn test_empty_scale_silences_everything() {
        let start = Instant::now();
        let mut engine = PulseEngine::seeded(start, 1);
        let mut voices: Vec<Voice> = (0..5).map(certain_voice).collect();

        let events = run(&mut engine, start, 200, Duration::from_millis(20), 120, &mut voices, &[]);
        assert!(notes(&events).is_empty());
        // pulses keep flowing
        assert!(events.iter().any(|e| matches!(e, EngineEvent::StemPulse { .. })));
    }

    #[test]
    fn test_inactive_voice_does_not_advance() {
        let start = Instant::now();
        let mut engine = PulseEngine::seeded(start, 1);
        let mut voice = certain_voice(0);
        voice.active = false;
        let mut voices = vec![voice];

        let events = run(&mut engine, start, 50, Duration::from_millis(20), 120, &mut voices, &[60]);
        assert!(notes(&events).is_empty());
        assert_eq!(voices[0].phase, Duration::ZERO);
    }

    #[test]
    fn test_event_order_within_tick() {
        let start = Instant::now();
        let mut engine = PulseEngine::seeded(start, 9);
        let mut voices = vec![certain_voice(4), certain_voice(1), certain_voice(2)];
        engine.reset(start, &mut voices);

        let events = engine.tick(start + Duration::from_millis(500), 120, &mut voices, &[60]);
        assert!(matches!(events[0], EngineEvent::StemPulse { .. }));
        let ids: Vec<u32> = notes(&events).iter().map(|n| n.voice_id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn test_reset_zeroes_phase_and_pulse() {
        let start = Instant::now();
        let mut engine = PulseEngine::seeded(start, 1);
        let mut voices = vec![certain_voice(0), certain_voice(1)];

        run(&mut engine, start, 13, Duration::from_millis(20), 120, &mut voices, &[60]);
        assert!(voices.iter().all(|v| v.phase > Duration::ZERO));
        assert!(engine.last_pulse().is_some());

        let later = start + Duration::from_secs(5);
        engine.reset(later, &mut voices);
        assert!(voices.iter().all(|v| v.phase == Duration::ZERO));
        assert_eq!(engine.last_pulse(), None);
        assert_eq!(engine.last_tick(), later);

        let events = engine.tick(later + Duration::from_millis(20), 120, &mut voices, &[60]);
        assert!(matches!(events[0], EngineEvent::StemPulse { .. }));
    }

    #[test]
    fn test_hold_prevents_stale_gap() {
        let start = Instant::now();
        let mut engine = PulseEngine::seeded(start, 1);
        let mut voices = vec![certain_voice(0)];

        let resume = start + Duration::from_secs(30);
        engine.hold(resume);
        let events = engine.tick(resume + Duration::from_millis(20), 120, &mut voices, &[60]);

        assert!(notes(&events).is_empty());
        assert_eq!(voices[0].phase, Duration::from_millis(20));
    }
}
