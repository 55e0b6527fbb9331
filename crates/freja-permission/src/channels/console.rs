// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{render_request, response_for_token, Channel, OPTIONS_LINE};
use crate::{ChannelResponse, PermissionRequest};

/// Channel that prompts on an interactive console.
///
/// Input and output are injectable so tests can script the exchange.  The
/// read blocks the calling task; this channel is meant for plain terminal
/// sessions where the driver is suspended on the approval anyway.
pub struct ConsoleChannel {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self::with_io(
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    /// Construct with custom IO (used by tests and embedding hosts).
    pub fn with_io(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self { input: Mutex::new(input), output: Mutex::new(output) }
    }

    fn prompt(&self, request: &PermissionRequest) -> std::io::Result<()> {
        let mut out = self.output.lock().unwrap();
        writeln!(out)?;
        writeln!(out, "{}", render_request(request))?;
        writeln!(out)?;
        writeln!(out, "{OPTIONS_LINE}")?;
        out.flush()
    }

    fn read_line(&self) -> std::io::Result<Option<String>> {
        let mut input = self.input.lock().unwrap();
        let mut line = String::new();
        let n = input.read_line(&mut line)?;
        Ok(if n == 0 { None } else { Some(line) })
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn request_permission(&self, request: &PermissionRequest) -> ChannelResponse {
        if let Err(e) = self.prompt(request) {
            return ChannelResponse::deny(
                &request.request_id,
                format!("Failed to display permission prompt: {e}"),
            );
        }
        match self.read_line() {
            Ok(Some(line)) => response_for_token(&line, request),
            // EOF: the user closed the input stream.
            Ok(None) => ChannelResponse::deny(&request.request_id, "User cancelled input"),
            Err(e) => {
                ChannelResponse::deny(&request.request_id, format!("Failed to read input: {e}"))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
