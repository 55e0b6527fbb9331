// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{render_request, response_for_token, Channel, OPTIONS_LINE};
use crate::{ChannelResponse, PermissionRequest};

/// How an output line relates to the current display block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Start a new output block.
    Write,
    /// Add to the current block from the same source.
    Append,
}

/// Callback receiving `(source, text, mode)` display lines.  The host
/// decides how to render; interleaving is a frontend concern.
pub type OutputCallback = Arc<dyn Fn(&str, &str, OutputMode) + Send + Sync>;

/// Channel for hosts whose console is occupied by another UI layer.
///
/// Prompts are emitted through an output callback and the decision line is
/// read from an async mailbox fed by the host's input handler.  Producer
/// and consumer must live on distinct execution contexts.
pub struct QueueChannel {
    output: OutputCallback,
    mailbox: Mutex<mpsc::Receiver<String>>,
}

impl QueueChannel {
    pub fn new(output: OutputCallback, mailbox: mpsc::Receiver<String>) -> Self {
        Self { output, mailbox: Mutex::new(mailbox) }
    }

    fn emit(&self, request: &PermissionRequest) {
        let rendered = format!("{}\n{OPTIONS_LINE}", render_request(request));
        let mut mode = OutputMode::Write;
        for line in rendered.lines() {
            (self.output)("permission", line, mode);
            mode = OutputMode::Append;
        }
    }
}

#[async_trait]
impl Channel for QueueChannel {
    fn name(&self) -> &str {
        "queue"
    }

    async fn request_permission(&self, request: &PermissionRequest) -> ChannelResponse {
        self.emit(request);

        let mut mailbox = self.mailbox.lock().await;
        let wait = Duration::from_secs(request.timeout_seconds);
        match tokio::time::timeout(wait, mailbox.recv()).await {
            Ok(Some(line)) => response_for_token(&line, request),
            Ok(None) => ChannelResponse::deny(&request.request_id, "Input mailbox closed"),
            Err(_) => request.timeout_response(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
