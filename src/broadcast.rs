//! Observer notifications
//!
//! The scheduler publishes and moves on; it never waits for delivery.
//! [`EventBus`] fans events out over a `tokio::sync::broadcast` channel, so a
//! slow subscriber only loses its own backlog.

use crate::error::MapleResult;
use crate::state::{AppState, GlobalUpdate};
use crate::voice::Voice;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of events buffered per subscriber
pub const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    /// Tempo reference, seconds since the Unix epoch
    StemPulse { timestamp: f64 },
    /// A voice fired
    NotePulse { voice_id: u32, pitch: u8 },
    /// One voice's configuration changed
    StateUpdate { voice: Voice },
    /// Transport-wide settings changed
    GlobalUpdate { updates: GlobalUpdate },
    /// Full state, sent on subscribe and after a load or replace
    Init { state: AppState, ports: Vec<String> },
}

impl BroadcastEvent {
    pub fn to_json(&self) -> MapleResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Fire-and-forget publication of events to observers
pub trait BroadcastSink: Send + Sync {
    fn publish(&self, event: BroadcastEvent);
}

/// In-process broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl BroadcastSink for EventBus {
    fn publish(&self, event: BroadcastEvent) {
        if self.sender.send(event).is_err() {
            trace!("No subscribers; event dropped");
        }
    }
}
