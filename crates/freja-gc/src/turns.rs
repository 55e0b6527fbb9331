// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeSet;

use freja_model::{estimate_history_tokens, Message, Part, Role};

/// A logical conversation turn: one user message plus every model response
/// and tool-response carrier up to (exclusive of) the next user message.
#[derive(Debug, Clone)]
pub struct Turn {
    pub index: usize,
    pub messages: Vec<Message>,
    pub estimated_tokens: usize,
}

impl Turn {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Split a history into logical turns.
///
/// A new turn starts at each user message that is not a tool-response
/// carrier; tool responses group with the model content that requested
/// them.  `flatten_turns(split_into_turns(h)) == h` for any history.
pub fn split_into_turns(history: &[Message]) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();
    let mut current: Vec<Message> = Vec::new();

    for message in history {
        let starts_turn = message.role == Role::User && !message.is_tool_response();
        if starts_turn && !current.is_empty() {
            push_turn(&mut turns, std::mem::take(&mut current));
        }
        current.push(message.clone());
    }
    if !current.is_empty() {
        push_turn(&mut turns, current);
    }
    turns
}

fn push_turn(turns: &mut Vec<Turn>, messages: Vec<Message>) {
    let estimated_tokens = estimate_history_tokens(&messages);
    turns.push(Turn { index: turns.len(), messages, estimated_tokens });
}

/// Flatten turns back into a message list, preserving order.
pub fn flatten_turns(turns: Vec<Turn>) -> Vec<Message> {
    turns.into_iter().flat_map(|t| t.messages).collect()
}

/// Wrap a summary in explicit delimiters so the model reads it as
/// compressed context rather than a user message.
pub fn summary_message(summary_text: &str) -> Message {
    Message::user(format!(
        "[Context Summary - Previous conversation compressed]\n{summary_text}\n[End Context Summary]"
    ))
}

/// A system-style notification injected into history after a collection.
pub fn notification_message(text: &str) -> Message {
    Message::user(format!("[System: {text}]"))
}

/// Turn indices that must survive collection: the most recent
/// `preserve_recent` plus any pinned indices that exist.
pub fn preserved_indices(
    total_turns: usize,
    preserve_recent: usize,
    pinned: &[usize],
) -> BTreeSet<usize> {
    let mut preserved = BTreeSet::new();
    if preserve_recent > 0 {
        let start = total_turns.saturating_sub(preserve_recent);
        preserved.extend(start..total_turns);
    }
    preserved.extend(pinned.iter().copied().filter(|&i| i < total_turns));
    preserved
}

/// Serialize turns into the flat role-prefixed transcript handed to a
/// summarizer.  Tool traffic is reduced to synthetic markers.
pub fn transcript_for_summary(turns: &[Turn]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for turn in turns {
        for message in &turn.messages {
            let role = match message.role {
                Role::User => "USER",
                Role::Model => "MODEL",
            };
            for part in &message.parts {
                match part {
                    Part::Text { text } if !text.is_empty() => {
                        lines.push(format!("{role}: {text}"));
                    }
                    Part::Text { .. } => {}
                    Part::ToolCall { name, .. } => lines.push(format!("{role}: [Called {name}]")),
                    Part::ToolResponse { name, .. } => {
                        lines.push(format!("{role}: [Response from {name}]"));
                    }
                    Part::InlineBlob { mime_type, .. } => {
                        lines.push(format!("{role}: [inline {mime_type} data]"));
                    }
                }
            }
        }
    }
    lines.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
