// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::Channel;
use crate::{ChannelResponse, PermissionRequest};

/// Channel that exchanges permission decisions through the filesystem.
///
/// A separate process (background service, manual editing) handles the
/// approval:
///
///   request files:  `<base>/requests/<request_id>.json`
///   response files: `<base>/responses/<request_id>.json`
///
/// The channel polls the responses directory and consumes both files once a
/// decision arrives.
pub struct FileChannel {
    base_path: PathBuf,
    poll_interval: Duration,
}

impl FileChannel {
    pub fn new(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(base_path.join("requests"))?;
        std::fs::create_dir_all(base_path.join("responses"))?;
        Ok(Self { base_path, poll_interval: Duration::from_millis(500) })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn request_file(&self, id: &str) -> PathBuf {
        self.base_path.join("requests").join(format!("{id}.json"))
    }

    fn response_file(&self, id: &str) -> PathBuf {
        self.base_path.join("responses").join(format!("{id}.json"))
    }
}

#[async_trait]
impl Channel for FileChannel {
    fn name(&self) -> &str {
        "file"
    }

    async fn request_permission(&self, request: &PermissionRequest) -> ChannelResponse {
        let request_file = self.request_file(&request.request_id);
        let response_file = self.response_file(&request.request_id);

        let wire = serde_json::to_string_pretty(&request.to_wire()).expect("request serializes");
        if let Err(e) = std::fs::write(&request_file, wire) {
            return ChannelResponse::deny(
                &request.request_id,
                format!("Failed to write request file: {e}"),
            );
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(request.timeout_seconds);
        loop {
            if response_file.exists() {
                let response = match std::fs::read_to_string(&response_file)
                    .map_err(anyhow::Error::from)
                    .and_then(|text| Ok(serde_json::from_str::<serde_json::Value>(&text)?))
                {
                    Ok(body) => ChannelResponse::from_wire(&body),
                    Err(e) => ChannelResponse::deny(
                        &request.request_id,
                        format!("Failed to read response file: {e}"),
                    ),
                };
                // Consume both files regardless of parse outcome.
                let _ = std::fs::remove_file(&request_file);
                let _ = std::fs::remove_file(&response_file);
                return response;
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = std::fs::remove_file(&request_file);
                return request.timeout_response();
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Sweep any request files left behind by unanswered approvals.
    fn shutdown(&self) {
        let requests = self.base_path.join("requests");
        let Ok(entries) = std::fs::read_dir(&requests) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to sweep request file");
                }
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
