// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only event ledger for token and tool accounting.
//!
//! The driver records one event per model response, tool invocation,
//! permission consult, and context collection.  The ledger is in-memory;
//! hosts export it as JSONL for offline analysis when they need a durable
//! trace.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// One recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEvent {
    pub timestamp: DateTime<Utc>,
    /// Event kind: `response`, `tool-call`, `permission-check`, `gc`.
    pub kind: String,
    pub payload: Value,
}

/// Aggregated view over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub model_calls: usize,
    pub prompt_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub tool_calls: usize,
    pub tool_errors: usize,
    pub permission_denials: usize,
    pub collections: usize,
}

/// In-memory accounting ledger.
#[derive(Debug, Default)]
pub struct TokenLedger {
    events: Vec<LedgerEvent>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: &str, payload: Value) {
        self.events.push(LedgerEvent {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            payload,
        });
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Aggregate token totals and call counts across all recorded events.
    pub fn summarize(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();
        for event in &self.events {
            match event.kind.as_str() {
                "response" => {
                    summary.model_calls += 1;
                    summary.prompt_tokens += field(&event.payload, "prompt_tokens");
                    summary.output_tokens += field(&event.payload, "output_tokens");
                    summary.total_tokens += field(&event.payload, "total_tokens");
                }
                "tool-call" => {
                    summary.tool_calls += 1;
                    if event.payload.get("ok") == Some(&json!(false)) {
                        summary.tool_errors += 1;
                    }
                }
                "permission-check" => {
                    if event.payload.get("allowed") == Some(&json!(false)) {
                        summary.permission_denials += 1;
                    }
                }
                "gc" => summary.collections += 1,
                _ => {}
            }
        }
        summary
    }

    /// Write the ledger as JSONL, one event per line.
    pub fn write_jsonl(&self, path: &Path) -> anyhow::Result<()> {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("creating ledger file {}", path.display()))?;
        for event in &self.events {
            let line =
                serde_json::to_string(event).context("serializing ledger event")?;
            writeln!(file, "{line}")
                .with_context(|| format!("writing ledger file {}", path.display()))?;
        }
        Ok(())
    }
}

fn field(payload: &Value, name: &str) -> usize {
    payload.get(name).and_then(Value::as_u64).unwrap_or(0) as usize
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
