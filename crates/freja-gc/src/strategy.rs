// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use freja_model::Message;

/// Context-window usage at the moment a collection decision is made.
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub model: String,
    pub context_limit: usize,
    pub total_tokens: usize,
    pub prompt_tokens: usize,
    pub output_tokens: usize,
    pub turns: usize,
    /// 0.0–100.0
    pub percent_used: f64,
    pub tokens_remaining: usize,
}

/// Garbage-collection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Collect when `percent_used` reaches this value.
    pub threshold_percent: f64,
    /// Collect when the turn count reaches this value, if set.
    pub max_turns: Option<usize>,
    /// Always keep this many of the most recent turns intact.
    pub preserve_recent_turns: usize,
    /// Turn indices that must never be collected.
    pub pinned_turn_indices: Vec<usize>,
    /// Master switch for automatic triggering.
    pub auto_trigger: bool,
    /// Run the trigger check before each model dispatch.
    pub check_before_send: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 80.0,
            max_turns: None,
            preserve_recent_turns: 5,
            pinned_turn_indices: Vec::new(),
            auto_trigger: true,
            check_before_send: true,
        }
    }
}

/// Why a collection ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Threshold,
    TurnLimit,
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::TurnLimit => "turn_limit",
            Self::Manual => "manual",
        }
    }
}

/// Outcome of one collection.
#[derive(Debug, Clone)]
pub struct GcResult {
    pub success: bool,
    /// Turns removed or compressed.
    pub items_collected: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub strategy: String,
    pub trigger_reason: TriggerReason,
    pub details: serde_json::Map<String, Value>,
    /// Notification text injected into the new history, when configured.
    pub notification: Option<String>,
    pub error: Option<String>,
}

impl GcResult {
    pub(crate) fn new(strategy: &str, reason: TriggerReason) -> Self {
        Self {
            success: true,
            items_collected: 0,
            tokens_before: 0,
            tokens_after: 0,
            strategy: strategy.to_string(),
            trigger_reason: reason,
            details: serde_json::Map::new(),
            notification: None,
            error: None,
        }
    }

    /// A collection that left the history as-is (everything preserved).
    pub(crate) fn nothing_to_collect(
        strategy: &str,
        reason: TriggerReason,
        tokens: usize,
        message: &str,
    ) -> Self {
        let mut result = Self::new(strategy, reason);
        result.tokens_before = tokens;
        result.tokens_after = tokens;
        result.details.insert("message".into(), Value::String(message.to_string()));
        result
    }

    /// A failed collection; the caller keeps the original history.
    pub(crate) fn failure(
        strategy: &str,
        reason: TriggerReason,
        tokens: usize,
        error: String,
    ) -> Self {
        let mut result = Self::new(strategy, reason);
        result.success = false;
        result.tokens_before = tokens;
        result.tokens_after = tokens;
        result.error = Some(error);
        result
    }
}

/// Async callable producing a summary of a flat conversation transcript.
pub type Summarizer =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// A pluggable context-reshaping strategy.
///
/// `should_collect` is the cheap trigger check; `collect` produces a
/// replacement history plus bookkeeping.  A failed collection returns the
/// original history unchanged with `success == false`; the driver keeps
/// running either way.
#[async_trait]
pub trait GcStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a collection should run now, and why.
    fn should_collect(&self, usage: &UsageSnapshot, config: &GcConfig) -> Option<TriggerReason> {
        if !config.auto_trigger {
            return None;
        }
        if usage.percent_used >= config.threshold_percent {
            return Some(TriggerReason::Threshold);
        }
        if let Some(max) = config.max_turns {
            if usage.turns >= max {
                return Some(TriggerReason::TurnLimit);
            }
        }
        None
    }

    /// Reshape `history`.  Returns the new history and the result record.
    async fn collect(
        &self,
        history: Vec<Message>,
        usage: &UsageSnapshot,
        config: &GcConfig,
        reason: TriggerReason,
    ) -> (Vec<Message>, GcResult);
}

/// Fill a notification template: `{removed}`, `{kept}`, `{tokens_freed}`.
pub(crate) fn fill_template(template: &str, removed: usize, kept: usize, freed: usize) -> String {
    template
        .replace("{removed}", &removed.to_string())
        .replace("{kept}", &kept.to_string())
        .replace("{tokens_freed}", &freed.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct NopStrategy;

    #[async_trait]
    impl GcStrategy for NopStrategy {
        fn name(&self) -> &str {
            "nop"
        }
        async fn collect(
            &self,
            history: Vec<Message>,
            _usage: &UsageSnapshot,
            _config: &GcConfig,
            reason: TriggerReason,
        ) -> (Vec<Message>, GcResult) {
            let result = GcResult::new("nop", reason);
            (history, result)
        }
    }

    fn usage(percent_used: f64, turns: usize) -> UsageSnapshot {
        UsageSnapshot { percent_used, turns, ..Default::default() }
    }

    #[test]
    fn threshold_triggers_collection() {
        let s = NopStrategy;
        let cfg = GcConfig { threshold_percent: 75.0, ..Default::default() };
        assert_eq!(s.should_collect(&usage(80.0, 1), &cfg), Some(TriggerReason::Threshold));
    }

    #[test]
    fn below_threshold_does_not_trigger() {
        let s = NopStrategy;
        let cfg = GcConfig { threshold_percent: 75.0, ..Default::default() };
        assert_eq!(s.should_collect(&usage(50.0, 1), &cfg), None);
    }

    #[test]
    fn threshold_is_inclusive() {
        let s = NopStrategy;
        let cfg = GcConfig { threshold_percent: 75.0, ..Default::default() };
        assert!(s.should_collect(&usage(75.0, 1), &cfg).is_some());
    }

    #[test]
    fn turn_limit_triggers_when_configured() {
        let s = NopStrategy;
        let cfg = GcConfig { max_turns: Some(10), ..Default::default() };
        assert_eq!(s.should_collect(&usage(1.0, 10), &cfg), Some(TriggerReason::TurnLimit));
    }

    #[test]
    fn turn_limit_ignored_when_unset() {
        let s = NopStrategy;
        let cfg = GcConfig::default();
        assert_eq!(s.should_collect(&usage(1.0, 1000), &cfg), None);
    }

    #[test]
    fn auto_trigger_off_disables_both_checks() {
        let s = NopStrategy;
        let cfg =
            GcConfig { auto_trigger: false, max_turns: Some(1), ..Default::default() };
        assert_eq!(s.should_collect(&usage(100.0, 100), &cfg), None);
    }

    #[test]
    fn template_fills_all_placeholders() {
        let out = fill_template("removed {removed}, kept {kept}, freed {tokens_freed}", 3, 2, 100);
        assert_eq!(out, "removed 3, kept 2, freed 100");
    }

    #[test]
    fn trigger_reason_strings() {
        assert_eq!(TriggerReason::Threshold.as_str(), "threshold");
        assert_eq!(TriggerReason::TurnLimit.as_str(), "turn_limit");
        assert_eq!(TriggerReason::Manual.as_str(), "manual");
    }
}
