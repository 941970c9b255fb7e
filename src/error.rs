//! Error types shared across the engine, the control surface and the stores

use std::fmt;

/// Errors raised by Maple components
#[derive(Debug)]
pub enum MapleError {
    /// MIDI backend could not be initialized
    MidiInit(String),
    /// Opening or switching an output port failed
    MidiConnect(String),
    /// A message did not reach the device
    MidiSend(String),
    /// No output port is currently open
    NotConnected,
    /// IO error
    Io(std::io::Error),
    /// JSON (de)serialization error
    Json(serde_json::Error),
    /// TOML configuration error
    Config(String),
    /// A value was outside its accepted range
    InvalidValue { field: &'static str, reason: String },
    /// An update named a field that does not exist
    UnknownField(String),
    /// No voice with this id
    UnknownVoice(u32),
    /// Malformed control message
    BadMessage(String),
    /// Shared state lock was poisoned by a panicking holder
    StatePoisoned,
}

impl fmt::Display for MapleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapleError::MidiInit(msg) => write!(f, "MIDI initialization failed: {}", msg),
            MapleError::MidiConnect(msg) => write!(f, "MIDI connection failed: {}", msg),
            MapleError::MidiSend(msg) => write!(f, "MIDI send failed: {}", msg),
            MapleError::NotConnected => write!(f, "Not connected to MIDI device"),
            MapleError::Io(e) => write!(f, "IO error: {}", e),
            MapleError::Json(e) => write!(f, "JSON error: {}", e),
            MapleError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MapleError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            MapleError::UnknownField(name) => write!(f, "Unknown field: {}", name),
            MapleError::UnknownVoice(id) => write!(f, "Unknown voice: {}", id),
            MapleError::BadMessage(msg) => write!(f, "Malformed message: {}", msg),
            MapleError::StatePoisoned => write!(f, "Shared state lock poisoned"),
        }
    }
}

impl std::error::Error for MapleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapleError::Io(e) => Some(e),
            MapleError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MapleError {
    fn from(e: std::io::Error) -> Self {
        MapleError::Io(e)
    }
}

impl From<serde_json::Error> for MapleError {
    fn from(e: serde_json::Error) -> Self {
        MapleError::Json(e)
    }
}

impl From<toml::de::Error> for MapleError {
    fn from(e: toml::de::Error) -> Self {
        MapleError::Config(e.to_string())
    }
}

impl MapleError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        MapleError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for Maple operations
pub type MapleResult<T> = Result<T, MapleError>;
