//! Note lifecycle: note-on now, note-off after the note's duration
//!
//! Each note-off is an independent tokio task carrying only the channel and
//! pitch. Overlapping notes on the same key are not merged, and nothing is
//! ever cancelled; a note-off that lands after [`NoteLifecycle::all_notes_off`]
//! is harmless.

use crate::generator::NoteEvent;
use crate::midi_output::OutputSink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct NoteLifecycle<O: ?Sized> {
    output: Arc<O>,
}

impl<O: ?Sized> Clone for NoteLifecycle<O> {
    fn clone(&self) -> Self {
        Self {
            output: Arc::clone(&self.output),
        }
    }
}

impl<O: OutputSink + ?Sized + 'static> NoteLifecycle<O> {
    pub fn new(output: Arc<O>) -> Self {
        Self { output }
    }

    /// Send the note-on and schedule its note-off.
    ///
    /// Must be called from within a tokio runtime.
    pub fn play(&self, note: &NoteEvent) -> JoinHandle<()> {
        if let Err(e) = self
            .output
            .send_note_on(note.channel, note.pitch, note.velocity)
        {
            warn!(
                "Note-on {} on channel {} for voice {} failed: {}",
                note.pitch, note.channel, note.voice_id, e
            );
        }

        let output = Arc::clone(&self.output);
        let (channel, pitch, duration) = (note.channel, note.pitch, note.duration);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(e) = output.send_note_off(channel, pitch) {
                warn!("Note-off {} on channel {} failed: {}", pitch, channel, e);
            } else {
                debug!("Note-off {} on channel {}", pitch, channel);
            }
        })
    }

    /// Send all-notes-off and all-sound-off on every channel
    pub fn all_notes_off(&self) {
        if let Err(e) = self.output.all_notes_off() {
            warn!("All notes off incomplete: {}", e);
        }
    }
}
