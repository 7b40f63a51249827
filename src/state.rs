//! Durable engine state.
//!
//! Three fields survive restarts: the enabled flag, the retrieval mode, and
//! the active KB name. The file is small JSON written atomically
//! (write-to-temp then rename); a missing or unparsable file falls back to
//! defaults so a corrupt state can never keep the engine from starting.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RagResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Single,
    Multi,
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMode::Single => f.write_str("single"),
            EngineMode::Multi => f.write_str("multi"),
        }
    }
}

/// On-disk engine state. Unknown fields are ignored on load; missing fields
/// take their defaults. `active_name` empty means "none".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mode")]
    pub mode: EngineMode,
    #[serde(default)]
    pub active_name: String,
}

fn default_enabled() -> bool {
    true
}

fn default_mode() -> EngineMode {
    EngineMode::Single
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: EngineMode::Single,
            active_name: String::new(),
        }
    }
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load persisted state, falling back to defaults when the file is
    /// absent or unreadable. Parse failures are logged, not surfaced.
    pub fn load(&self) -> PersistedState {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        path = %self.path.display(),
                        "Failed to read state file, using defaults: {err}"
                    );
                }
                return PersistedState::default();
            }
        };
        match serde_json::from_str(&json) {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    "Failed to parse state file, using defaults: {err}"
                );
                PersistedState::default()
            }
        }
    }

    /// Atomic write: write to a temp file then rename so a crash mid-write
    /// never leaves a truncated state file behind.
    pub fn save(&self, state: &PersistedState) -> RagResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
