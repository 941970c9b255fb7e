//! On-disk state documents
//!
//! The whole `AppState` is stored as pretty-printed JSON. Unknown keys are
//! ignored and missing keys fall back to defaults, so documents written by
//! older builds keep loading. Every loaded document is sanitized before the
//! engine sees it.

use crate::error::MapleResult;
use crate::state::AppState;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_STATE_FILE: &str = "maple_state.json";

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> MapleResult<AppState> {
        let text = fs::read_to_string(&self.path)?;
        let mut state: AppState = serde_json::from_str(&text)?;
        state.sanitize();
        info!(
            "Loaded state from {} ({} voices)",
            self.path.display(),
            state.voices.len()
        );
        Ok(state)
    }

    /// Load the stored document, or start from defaults if there is none
    pub fn load_or_default(&self) -> AppState {
        if !self.exists() {
            return AppState::default();
        }
        match self.load() {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "Could not load {}: {}. Starting from defaults",
                    self.path.display(),
                    e
                );
                AppState::default()
            }
        }
    }

    /// Write atomically: serialize to a sibling temp file, then rename
    pub fn save(&self, state: &AppState) -> MapleResult<()> {
        let json = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        info!("Saved state to {}", self.path.display());
        Ok(())
    }
}
