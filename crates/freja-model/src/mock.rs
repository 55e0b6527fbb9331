// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Message, ModelProvider, ModelResponse, Part, Role, ToolCallRequest, Usage};

/// Deterministic mock provider for tests.  Echoes the last user text back as
/// the model response.
#[derive(Default)]
pub struct EchoProvider {
    history: Vec<Message>,
}

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn send_message(&mut self, parts: Vec<Part>) -> anyhow::Result<ModelResponse> {
        self.history.push(Message::user_parts(parts));
        let reply = self
            .history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();
        let text = format!("ECHO: {reply}");
        self.history.push(Message::model(&text));
        Ok(ModelResponse::text_only(text, Usage::new(10, 10)))
    }

    fn history(&self) -> Vec<Message> {
        self.history.clone()
    }

    fn reset(&mut self, history: Option<Vec<Message>>) {
        self.history = history.unwrap_or_default();
    }
}

/// A pre-scripted mock provider.  Each `send_message` call pops the next
/// response from the front of the queue, so tests can specify exact turn
/// sequences – including tool calls – without network access.
///
/// The provider maintains a real transcript (user parts in, model reply out)
/// so history-dependent code paths (GC install, session save, command
/// injection) behave as they would against a live chat handle.
pub struct ScriptedProvider {
    scripts: Vec<ModelResponse>,
    history: Vec<Message>,
    model_name: String,
    /// Every `parts` argument seen by `send_message`, in call order.
    /// Tests clone the handle via [`ScriptedProvider::request_log`] before
    /// handing the provider to the runtime.
    requests: Arc<Mutex<Vec<Vec<Part>>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of responses.
    pub fn new(scripts: Vec<ModelResponse>) -> Self {
        Self {
            scripts,
            history: Vec::new(),
            model_name: "scripted-mock-model".into(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![ModelResponse::text_only(reply, Usage::new(5, 5))])
    }

    /// Convenience: provider that returns one tool call, then a text reply.
    pub fn tool_then_text(
        tool_name: impl Into<String>,
        args: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            ModelResponse {
                text: String::new(),
                tool_calls: vec![ToolCallRequest { name: tool_name.into(), args }],
                usage: Usage::new(5, 5),
            },
            ModelResponse::text_only(final_text, Usage::new(5, 5)),
        ])
    }

    /// Override the reported model name (for catalog-dependent tests).
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Shared handle to the request log; clone before moving the provider.
    pub fn request_log(&self) -> Arc<Mutex<Vec<Vec<Part>>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn send_message(&mut self, parts: Vec<Part>) -> anyhow::Result<ModelResponse> {
        self.requests.lock().unwrap().push(parts.clone());
        self.history.push(Message::user_parts(parts));

        let response = if self.scripts.is_empty() {
            // Default fallback when all scripts are consumed
            ModelResponse::text_only("[no more scripts]", Usage::default())
        } else {
            self.scripts.remove(0)
        };

        let mut reply_parts: Vec<Part> = Vec::new();
        if !response.text.is_empty() {
            reply_parts.push(Part::text(&response.text));
        }
        for tc in &response.tool_calls {
            reply_parts.push(Part::tool_call(&tc.name, tc.args.clone()));
        }
        if !reply_parts.is_empty() {
            self.history.push(Message::model_parts(reply_parts));
        }

        Ok(response)
    }

    fn history(&self) -> Vec<Message> {
        self.history.clone()
    }

    fn reset(&mut self, history: Option<Vec<Message>>) {
        self.history = history.unwrap_or_default();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
