// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::json;

use freja_model::{estimate_history_tokens, Message};

use crate::strategy::fill_template;
use crate::{
    flatten_turns, preserved_indices, split_into_turns, summary_message, transcript_for_summary,
    GcConfig, GcResult, GcStrategy, Summarizer, TriggerReason, Turn, UsageSnapshot,
};

const DEFAULT_NOTIFICATION: &str =
    "Context cleaned: summarized {removed} old turns into context summary.";

/// Compression-based collection: old turns are summarized rather than
/// dropped, preserving their information at a fraction of the tokens.
///
/// A summarizer is required.  Without one (or when the summarizer fails)
/// the strategy reports failure and the history is returned unchanged.
#[derive(Default)]
pub struct SummarizeStrategy {
    summarizer: Option<Summarizer>,
    preserve_recent_turns: Option<usize>,
    notify_on_gc: bool,
    notification_template: Option<String>,
}

impl SummarizeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Override the preservation count from [`GcConfig`].
    pub fn with_preserve_recent(mut self, turns: usize) -> Self {
        self.preserve_recent_turns = Some(turns);
        self
    }

    pub fn with_notification(mut self, template: Option<String>) -> Self {
        self.notify_on_gc = true;
        self.notification_template = template;
        self
    }
}

#[async_trait]
impl GcStrategy for SummarizeStrategy {
    fn name(&self) -> &str {
        "gc_summarize"
    }

    async fn collect(
        &self,
        history: Vec<Message>,
        _usage: &UsageSnapshot,
        config: &GcConfig,
        reason: TriggerReason,
    ) -> (Vec<Message>, GcResult) {
        let tokens_before = estimate_history_tokens(&history);

        let Some(summarizer) = &self.summarizer else {
            let result = GcResult::failure(
                self.name(),
                reason,
                tokens_before,
                "No summarizer configured. Provide one with with_summarizer().".to_string(),
            );
            return (history, result);
        };

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

        let (to_summarize, to_preserve): (Vec<Turn>, Vec<Turn>) =
            turns.into_iter().partition(|t| !preserved.contains(&t.index));

        let transcript = transcript_for_summary(&to_summarize);
        let summary_text = match summarizer(transcript).await {
            Ok(text) => text,
            Err(e) => {
                let result = GcResult::failure(
                    self.name(),
                    reason,
                    tokens_before,
                    format!("Summarization failed: {e}"),
                );
                return (history, result);
            }
        };

        let summarized = to_summarize.len();
        let kept = to_preserve.len();
        let mut new_history = vec![summary_message(&summary_text)];
        new_history.extend(flatten_turns(to_preserve));
        let tokens_after = estimate_history_tokens(&new_history);

        let mut result = GcResult::new(self.name(), reason);
        result.items_collected = summarized;
        result.tokens_before = tokens_before;
        result.tokens_after = tokens_after;
        result.details.insert("turns_before".into(), json!(total));
        result.details.insert("turns_after".into(), json!(kept + 1));
        result.details.insert("turns_summarized".into(), json!(summarized));
        result.details.insert("preserve_count".into(), json!(preserve_count));
        result.details.insert("summary_length".into(), json!(summary_text.len()));

        if self.notify_on_gc {
            let template =
                self.notification_template.as_deref().unwrap_or(DEFAULT_NOTIFICATION);
            result.notification = Some(fill_template(
                template,
                summarized,
                kept,
                tokens_before.saturating_sub(tokens_after),
            ));
        }

        (new_history, result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
