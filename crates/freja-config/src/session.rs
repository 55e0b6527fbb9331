// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::ConfigError;

/// Environment variable consulted when no explicit config path is given.
pub const SESSION_CONFIG_ENV: &str = "FREJA_SESSION_CONFIG";

/// Conventional location for the session config file.
const DEFAULT_CONFIG_PATH: &str = ".freja/sessions.json";

/// Session persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory session directories are created under.
    pub storage_path: PathBuf,
    /// Save the session when the runtime shuts down gracefully.
    pub auto_save_on_exit: bool,
    /// Optional periodic save interval in seconds (driven by the host).
    pub auto_save_interval: Option<u64>,
    /// Checkpoint the session every N completed turns.
    pub checkpoint_after_turns: Option<u32>,
    /// Restore the most recent session at startup.
    pub auto_resume_last: bool,
    /// After N turns, the host may prompt for a session description.
    pub request_description_after_turns: u32,
    /// Keep at most this many sessions; older ones are pruned after save.
    pub max_sessions: usize,
    /// Free-form extra configuration forwarded to the store.
    pub plugin_config: serde_json::Map<String, Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(".freja/sessions"),
            auto_save_on_exit: true,
            auto_save_interval: None,
            checkpoint_after_turns: Some(10),
            auto_resume_last: false,
            request_description_after_turns: 3,
            max_sessions: 20,
            plugin_config: serde_json::Map::new(),
        }
    }
}

/// Load the session configuration.
///
/// Resolution order: explicit `path` → `$FREJA_SESSION_CONFIG` →
/// `./.freja/sessions.json` → defaults.  A malformed file at a default
/// location is logged and replaced by defaults; an explicit path that fails
/// to parse is an error.
pub fn load_session_config(path: Option<&Path>) -> Result<SessionConfig, ConfigError> {
    if let Some(p) = path {
        if !p.is_file() {
            return Err(ConfigError::NotFound(p.to_path_buf()));
        }
        return parse_file(p);
    }

    let candidate = match std::env::var(SESSION_CONFIG_ENV) {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    };

    if candidate.is_file() {
        match parse_file(&candidate) {
            Ok(cfg) => Ok(cfg),
            Err(e) => {
                warn!(path = %candidate.display(), error = %e, "ignoring malformed session config");
                Ok(SessionConfig::default())
            }
        }
    } else {
        Ok(SessionConfig::default())
    }
}

fn parse_file(path: &Path) -> Result<SessionConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Write a session configuration to `path` (or the conventional location),
/// creating parent directories as needed.
pub fn save_session_config(config: &SessionConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let target = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| ConfigError::Io { path: target.clone(), source })?;
    }
    let text = serde_json::to_string_pretty(config).expect("session config serializes");
    std::fs::write(&target, text).map_err(|source| ConfigError::Io { path: target, source })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
