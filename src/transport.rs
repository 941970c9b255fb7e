//! Transport loop
//!
//! A single cooperative task that owns the pulse engine. Each iteration reads
//! `playing`, handles the Idle/Running transitions, ticks the engine under
//! the state lock and then routes the resulting events with the lock
//! released. [`Transport::step`] is one iteration at a caller-supplied
//! instant; [`Transport::run`] drives it forever on the tokio clock.

use crate::broadcast::{BroadcastEvent, BroadcastSink};
use crate::config::TransportConfig;
use crate::engine::{EngineEvent, PulseEngine};
use crate::error::{MapleError, MapleResult};
use crate::lifecycle::NoteLifecycle;
use crate::midi_output::OutputSink;
use crate::state::{self, AppState, SharedState};
use rand::rngs::StdRng;
use rand::Rng;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// What one iteration did, and so how long to wait before the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Idle,
    Running { events: usize },
}

pub struct Transport<R = StdRng> {
    state: SharedState,
    engine: PulseEngine<R>,
    notes: NoteLifecycle<dyn OutputSink>,
    bus: Arc<dyn BroadcastSink>,
    timing: TransportConfig,
    was_playing: bool,
    anchor: (Instant, SystemTime),
}

impl Transport<StdRng> {
    pub fn new(
        state: SharedState,
        output: Arc<dyn OutputSink>,
        bus: Arc<dyn BroadcastSink>,
        timing: TransportConfig,
    ) -> Self {
        let engine = PulseEngine::new(Instant::now());
        Self::with_engine(state, engine, output, bus, timing)
    }
}

impl<R: Rng> Transport<R> {
    pub fn with_engine(
        state: SharedState,
        engine: PulseEngine<R>,
        output: Arc<dyn OutputSink>,
        bus: Arc<dyn BroadcastSink>,
        timing: TransportConfig,
    ) -> Self {
        Self {
            state,
            engine,
            notes: NoteLifecycle::new(output),
            bus,
            timing,
            was_playing: false,
            anchor: (Instant::now(), SystemTime::now()),
        }
    }

    pub fn engine(&self) -> &PulseEngine<R> {
        &self.engine
    }

    /// One loop iteration at `now`. Must run inside a tokio runtime, since
    /// note-offs are scheduled as tasks.
    pub fn step(&mut self, now: Instant) -> MapleResult<Step> {
        let (events, stopped) = {
            let mut guard = state::lock(&self.state)?;
            let AppState {
                tempo,
                voices,
                scale,
                playing,
                ..
            } = &mut *guard;

            if *playing && !self.was_playing {
                info!("Playback started: resetting engine");
                self.engine.reset(now, voices);
            }
            let stopped = !*playing && self.was_playing;
            self.was_playing = *playing;

            if *playing {
                (Some(self.engine.tick(now, *tempo, voices, scale)), stopped)
            } else {
                self.engine.hold(now);
                (None, stopped)
            }
        };

        if stopped {
            info!("Playback stopped: all notes off");
            self.notes.all_notes_off();
        }

        match events {
            None => Ok(Step::Idle),
            Some(events) => {
                self.route(&events);
                Ok(Step::Running {
                    events: events.len(),
                })
            }
        }
    }

    fn route(&self, events: &[EngineEvent]) {
        for event in events {
            match event {
                EngineEvent::StemPulse { at } => {
                    self.bus.publish(BroadcastEvent::StemPulse {
                        timestamp: self.wall_clock(*at),
                    });
                }
                EngineEvent::Note(note) => {
                    debug!(
                        "Voice {} note {} vel {} ch {}",
                        note.voice_id, note.pitch, note.velocity, note.channel
                    );
                    self.notes.play(note);
                    self.bus.publish(BroadcastEvent::NotePulse {
                        voice_id: note.voice_id,
                        pitch: note.pitch,
                    });
                }
            }
        }
    }

    /// Seconds since the Unix epoch for a monotonic instant
    fn wall_clock(&self, at: Instant) -> f64 {
        let (instant, system) = self.anchor;
        let wall = system + at.saturating_duration_since(instant);
        wall.duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
    }

    /// Drive the loop for the lifetime of the process.
    ///
    /// A failed or panicking iteration is logged and followed by the error
    /// backoff; the loop itself never exits. Time is read from the tokio
    /// clock, so a paused test runtime drives the engine as well.
    pub async fn run(mut self) {
        info!("Starting generation loop");
        loop {
            let now = tokio::time::Instant::now().into_std();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.step(now)));

            let pause = match outcome {
                Ok(Ok(Step::Idle)) => self.timing.idle_poll(),
                Ok(Ok(Step::Running { .. })) => self.timing.tick(),
                Ok(Err(e)) => {
                    error!("Error in generation loop: {}", e);
                    if matches!(e, MapleError::StatePoisoned) {
                        self.state.clear_poison();
                    }
                    self.timing.error_backoff()
                }
                Err(_) => {
                    error!("Generation loop iteration panicked");
                    self.state.clear_poison();
                    self.timing.error_backoff()
                }
            };
            tokio::time::sleep(pause).await;
        }
    }
}
