//! Runtime configuration (`maple.toml`)
//!
//! ```toml
//! [transport]
//! idle_poll_ms = 100
//! tick_ms = 20
//! error_backoff_ms = 1000
//!
//! [server]
//! bind = "0.0.0.0"
//! osc_port = 7770
//!
//! [midi]
//! port = "IAC Driver"   # optional, partial name match
//!
//! [state]
//! path = "maple_state.json"
//! ```

use crate::error::MapleResult;
use crate::store::DEFAULT_STATE_FILE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_FILE: &str = "maple.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub server: ServerConfig,
    pub midi: MidiConfig,
    pub state: StateConfig,
}

/// Loop cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub idle_poll_ms: u64,
    pub tick_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 100,
            tick_ms: 20,
            error_backoff_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub osc_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            osc_port: 7770,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.osc_port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Hardware port to open at startup instead of the virtual port
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
    /// Load the saved document at startup
    pub load_on_start: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_FILE),
            load_on_start: true,
        }
    }
}

impl AppConfig {
    pub fn from_toml(text: &str) -> MapleResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> MapleResult<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Explicit path if given, else `./maple.toml`, else the user config
    /// directory, else built-in defaults
    pub fn discover(explicit: Option<&Path>) -> MapleResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|dir| dir.join("maple").join(CONFIG_FILE)),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cadence() {
        let config = AppConfig::default();
        assert_eq!(config.transport.idle_poll(), Duration::from_millis(100));
        assert_eq!(config.transport.tick(), Duration::from_millis(20));
        assert_eq!(config.transport.error_backoff(), Duration::from_secs(1));
        assert_eq!(config.server.addr(), "0.0.0.0:7770");
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [transport]
            tick_ms = 5

            [midi]
            port = "IAC"
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.tick_ms, 5);
        assert_eq!(config.transport.idle_poll_ms, 100);
        assert_eq!(config.midi.port.as_deref(), Some("IAC"));
        assert_eq!(config.state.path, PathBuf::from("maple_state.json"));
    }

    #[test]
    fn test_bad_toml() {
        assert!(AppConfig::from_toml("[transport]\ntick_ms = \"fast\"").is_err());
    }

    #[test]
    fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maple.toml");
        std::fs::write(&path, "[server]\nosc_port = 9000\n").unwrap();
        let config = AppConfig::discover(Some(&path)).unwrap();
        assert_eq!(config.server.osc_port, 9000);
    }
}
