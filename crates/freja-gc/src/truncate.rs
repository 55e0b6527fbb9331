// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::json;

use freja_model::{estimate_history_tokens, Message};

use crate::strategy::fill_template;
use crate::{
    flatten_turns, notification_message, preserved_indices, split_into_turns, GcConfig, GcResult,
    GcStrategy, TriggerReason, UsageSnapshot,
};

const DEFAULT_NOTIFICATION: &str =
    "Context cleaned: removed {removed} old turns, kept {kept} recent turns.";

/// The simplest collection strategy: drop every non-preserved turn.
///
/// No summarization, minimal overhead.  Preserved turns are the most recent
/// N (configurable here or via [`GcConfig`]) plus any pinned indices.
#[derive(Default)]
pub struct TruncateStrategy {
    preserve_recent_turns: Option<usize>,
    notify_on_gc: bool,
    notification_template: Option<String>,
}

impl TruncateStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the preservation count from [`GcConfig`].
    pub fn with_preserve_recent(mut self, turns: usize) -> Self {
        self.preserve_recent_turns = Some(turns);
        self
    }

    /// Prepend a notification message to the collected history.
    pub fn with_notification(mut self, template: Option<String>) -> Self {
        self.notify_on_gc = true;
        self.notification_template = template;
        self
    }
}

#[async_trait]
impl GcStrategy for TruncateStrategy {
    fn name(&self) -> &str {
        "gc_truncate"
    }

    async fn collect(
        &self,
        history: Vec<Message>,
        _usage: &UsageSnapshot,
        config: &GcConfig,
        reason: TriggerReason,
    ) -> (Vec<Message>, GcResult) {
        let tokens_before = estimate_history_tokens(&history);
        let turns = split_into_turns(&history);
        let total = turns.len();

        let preserve_count =
            self.preserve_recent_turns.unwrap_or(config.preserve_recent_turns);
        let preserved = preserved_indices(total, preserve_count, &config.pinned_turn_indices);

        if preserved.len() >= total {
            let result = GcResult::nothing_to_collect(
                self.name(),
                reason,
                tokens_before,
                "All turns preserved, nothing to collect",
            );
            return (history, result);
        }

        let mut kept = Vec::new();
        let mut removed = 0usize;
        for turn in turns {
            if preserved.contains(&turn.index) {
                kept.push(turn);
            } else {
                removed += 1;
            }
        }

        let kept_count = kept.len();
        let mut new_history = flatten_turns(kept);
        let tokens_after = estimate_history_tokens(&new_history);

        let mut result = GcResult::new(self.name(), reason);
        result.items_collected = removed;
        result.tokens_before = tokens_before;
        result.tokens_after = tokens_after;
        result.details.insert("turns_before".into(), json!(total));
        result.details.insert("turns_after".into(), json!(kept_count));
        result.details.insert("preserve_count".into(), json!(preserve_count));

        if self.notify_on_gc {
            let template =
                self.notification_template.as_deref().unwrap_or(DEFAULT_NOTIFICATION);
            let text = fill_template(
                template,
                removed,
                kept_count,
                tokens_before.saturating_sub(tokens_after),
            );
            new_history.insert(0, notification_message(&text));
            result.notification = Some(text);
        }

        (new_history, result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
