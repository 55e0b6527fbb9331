// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{Message, ModelResponse, Part, Usage};

/// Abstract chat endpoint the driver depends on.
///
/// A provider owns the transcript of the conversation the way an SDK chat
/// handle does: `send_message` appends the user parts and the model's reply
/// internally, `history` reads the transcript back, and `reset` installs a
/// replacement history atomically (used by context GC and session restore).
///
/// Implementations translate to and from their wire format; the driver never
/// sees provider-specific types.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users and used for context-limit
    /// lookups.
    fn model_name(&self) -> &str;

    /// Submit one user turn and return the model's reply.
    ///
    /// The reply exposes `text` (may be empty), zero or more tool-call
    /// requests, and the usage accounting for the call.
    async fn send_message(&mut self, parts: Vec<Part>) -> anyhow::Result<ModelResponse>;

    /// Snapshot of the current conversation history.
    fn history(&self) -> Vec<Message>;

    /// Replace the conversation history.  `None` clears it.
    fn reset(&mut self, history: Option<Vec<Message>>);

    /// Pre-submission token estimate for a text fragment.
    ///
    /// The default uses the canonical chars/4 heuristic; providers with a
    /// counting endpoint may override.
    fn count_tokens(&self, text: &str) -> Usage {
        let estimate = ((text.len() / 4).max(1)) as u32;
        Usage { prompt_tokens: estimate, output_tokens: 0, total_tokens: estimate }
    }
}
