// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use freja_config::SessionConfig;
use freja_model::Message;

use crate::{SessionError, SessionInfo, SessionState, TurnUsage};

/// Persistence layer for conversation sessions.
///
/// `save` is last-writer-wins per session id; a single driver owns the id,
/// so no cross-process coordination is attempted.  The lifecycle hooks let
/// the driver delegate checkpointing policy to the store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// All saved sessions, sorted by `updated_at` descending.
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, SessionError>;

    async fn load(&self, session_id: &str) -> Result<SessionState, SessionError>;

    async fn save(&self, state: &SessionState) -> Result<(), SessionError>;

    /// Returns `true` if the session existed.
    async fn delete(&self, session_id: &str) -> Result<bool, SessionError>;

    /// Called at driver startup.  Returns a session to restore when
    /// auto-resume applies.
    async fn on_session_start(&self, config: &SessionConfig) -> Option<SessionState> {
        if !config.auto_resume_last {
            return None;
        }
        let sessions = self.list_sessions().await.ok()?;
        let latest = sessions.first()?;
        match self.load(&latest.session_id).await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(session = %latest.session_id, error = %e, "auto-resume failed");
                None
            }
        }
    }

    /// Called after each fully resolved user→terminal-response cycle.
    /// Checkpoints every `checkpoint_after_turns` turns; save failures are
    /// logged, never retried.
    async fn on_turn_complete(&self, state: &SessionState, config: &SessionConfig) {
        let Some(every) = config.checkpoint_after_turns else {
            return;
        };
        if every == 0 || state.turn_count == 0 || state.turn_count % every as usize != 0 {
            return;
        }
        if let Err(e) = self.save(state).await {
            warn!(session = %state.session_id, error = %e, "checkpoint save failed");
        }
    }

    /// Called at graceful shutdown.  Performs the final save if configured.
    async fn on_session_end(&self, state: &SessionState, config: &SessionConfig) {
        if !config.auto_save_on_exit {
            return;
        }
        if let Err(e) = self.save(state).await {
            warn!(session = %state.session_id, error = %e, "final save failed");
        }
    }
}

/// Header file stored next to the history blob.
#[derive(Debug, Serialize, Deserialize)]
struct SessionMeta {
    session_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    turn_count: usize,
    turn_accounting: Vec<TurnUsage>,
    #[serde(default)]
    connection: crate::ConnectionInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

/// File-backed session store: one directory per session id containing a
/// `meta.json` header and a `history.json` blob.
pub struct FileSessionStore {
    root: PathBuf,
    max_sessions: Option<usize>,
}

impl FileSessionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf(), max_sessions: None }
    }

    /// Keep at most `n` sessions; the oldest are pruned after each save.
    pub fn with_max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = Some(n);
        self
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.storage_path).with_max_sessions(config.max_sessions)
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn read_meta(&self, dir: &Path) -> Result<SessionMeta, SessionError> {
        let path = dir.join("meta.json");
        let text = std::fs::read_to_string(&path)
            .map_err(|source| SessionError::Io { path: path.clone(), source })?;
        serde_json::from_str(&text).map_err(|source| SessionError::Corrupt { path, source })
    }

    /// Attach or replace a human-readable description on a saved session.
    pub fn set_description(
        &self,
        session_id: &str,
        description: &str,
    ) -> Result<(), SessionError> {
        let dir = self.session_dir(session_id);
        if !dir.is_dir() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let mut meta = self.read_meta(&dir)?;
        meta.description = Some(description.to_string());
        write_json(&dir.join("meta.json"), &meta)
    }

    fn prune(&self) {
        let Some(max) = self.max_sessions else {
            return;
        };
        let Ok(mut sessions) = self.list_sync() else {
            return;
        };
        // Sorted newest-first; everything past `max` goes.
        for info in sessions.drain(..).skip(max) {
            let dir = self.session_dir(&info.session_id);
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(session = %info.session_id, error = %e, "failed to prune old session");
            }
        }
    }

    fn list_sync(&self) -> Result<Vec<SessionInfo>, SessionError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root)
            .map_err(|source| SessionError::Io { path: self.root.clone(), source })?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            match self.read_meta(&dir) {
                Ok(meta) => sessions.push(SessionInfo {
                    session_id: meta.session_id,
                    created_at: meta.created_at,
                    updated_at: meta.updated_at,
                    turn_count: meta.turn_count,
                    description: meta.description,
                }),
                Err(e) => warn!(dir = %dir.display(), error = %e, "skipping unreadable session"),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SessionError> {
    let text = serde_json::to_string_pretty(value).expect("session data serializes");
    std::fs::write(path, text)
        .map_err(|source| SessionError::Io { path: path.to_path_buf(), source })
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, SessionError> {
        self.list_sync()
    }

    async fn load(&self, session_id: &str) -> Result<SessionState, SessionError> {
        let dir = self.session_dir(session_id);
        if !dir.is_dir() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let meta = self.read_meta(&dir)?;

        let history_path = dir.join("history.json");
        let text = std::fs::read_to_string(&history_path)
            .map_err(|source| SessionError::Io { path: history_path.clone(), source })?;
        let history: Vec<Message> = serde_json::from_str(&text)
            .map_err(|source| SessionError::Corrupt { path: history_path, source })?;

        Ok(SessionState {
            session_id: meta.session_id,
            history,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            turn_count: meta.turn_count,
            turn_accounting: meta.turn_accounting,
            connection: meta.connection,
        })
    }

    async fn save(&self, state: &SessionState) -> Result<(), SessionError> {
        let dir = self.session_dir(&state.session_id);
        std::fs::create_dir_all(&dir)
            .map_err(|source| SessionError::Io { path: dir.clone(), source })?;

        // Overwrites keep the original creation time and description.
        let existing = self.read_meta(&dir).ok();
        let meta = SessionMeta {
            session_id: state.session_id.clone(),
            created_at: existing.as_ref().map(|m| m.created_at).unwrap_or(state.created_at),
            updated_at: state.updated_at,
            turn_count: state.turn_count,
            turn_accounting: state.turn_accounting.clone(),
            connection: state.connection.clone(),
            description: existing.and_then(|m| m.description),
        };
        write_json(&dir.join("meta.json"), &meta)?;
        write_json(&dir.join("history.json"), &state.history)?;

        self.prune();
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        let dir = self.session_dir(session_id);
        if !dir.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)
            .map_err(|source| SessionError::Io { path: dir, source })?;
        Ok(true)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
