// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use freja_model::Message;

/// Token usage of one completed turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnUsage {
    pub prompt: usize,
    pub output: usize,
    pub total: usize,
}

/// Provider metadata captured alongside a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub provider: Option<String>,
    pub region: Option<String>,
    pub model: Option<String>,
}

/// Immutable snapshot of an entire conversation at save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
    pub turn_accounting: Vec<TurnUsage>,
    #[serde(default)]
    pub connection: ConnectionInfo,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, history: Vec<Message>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            history,
            created_at: now,
            updated_at: now,
            turn_count: 0,
            turn_accounting: Vec::new(),
            connection: ConnectionInfo::default(),
        }
    }
}

/// Lightweight listing entry for a saved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Auto-generated session id: local time as `YYYYMMDD_HHMMSS`.
pub fn generate_session_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Errors from the session store.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("session I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session data at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
