//! Shared test doubles for the integration tests

#![allow(dead_code)]

use maple::broadcast::{BroadcastEvent, BroadcastSink};
use maple::midi_output::{MidiMessage, OutputSink, CC_ALL_NOTES_OFF};
use maple::MapleResult;
use std::sync::Mutex;

/// Output sink that remembers everything it was asked to send
#[derive(Default)]
pub struct RecordingOutput {
    pub sent: Mutex<Vec<MidiMessage>>,
}

impl OutputSink for RecordingOutput {
    fn send(&self, msg: MidiMessage) -> MapleResult<()> {
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

impl RecordingOutput {
    pub fn note_ons(&self) -> Vec<(u8, u8)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| match m {
                MidiMessage::NoteOn { channel, note, .. } => Some((*channel, *note)),
                _ => None,
            })
            .collect()
    }

    pub fn note_offs(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, MidiMessage::NoteOff { .. }))
            .count()
    }

    /// Number of all-notes-off sweeps (one CC 123 on channel 0 per sweep)
    pub fn all_notes_off_calls(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                matches!(
                    m,
                    MidiMessage::ControlChange {
                        channel: 0,
                        controller: CC_ALL_NOTES_OFF,
                        ..
                    }
                )
            })
            .count()
    }
}

/// Broadcast sink that keeps events in publication order
#[derive(Default)]
pub struct RecordingBus {
    pub events: Mutex<Vec<BroadcastEvent>>,
}

impl BroadcastSink for RecordingBus {
    fn publish(&self, event: BroadcastEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingBus {
    pub fn note_pulses(&self) -> Vec<(u32, u8)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                BroadcastEvent::NotePulse { voice_id, pitch } => Some((*voice_id, *pitch)),
                _ => None,
            })
            .collect()
    }

    pub fn stem_pulses(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, BroadcastEvent::StemPulse { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}
