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

const DEFAULT_NOTIFICATION: &str = "Context cleaned: {removed} turns collected, \
                                    {kept} recent turns preserved.";

/// Generational collection: young turns survive intact, older generations
/// are compressed or dropped.
///
/// Turns are classified as *young* (the most recent N), *old* (the next M
/// before young), and *ancient* (everything earlier).  With a summarizer,
/// ancient and old turns collapse into a single summary block ahead of the
/// young tail; without one the strategy degrades to truncation.  Pinned
/// turns count as young regardless of age.
#[derive(Default)]
pub struct HybridStrategy {
    summarizer: Option<Summarizer>,
    preserve_recent_turns: Option<usize>,
    summarize_middle_turns: usize,
    notify_on_gc: bool,
    notification_template: Option<String>,
}

impl HybridStrategy {
    pub fn new() -> Self {
        Self { summarize_middle_turns: 10, ..Default::default() }
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

    /// Size of the old generation (turns summarized rather than ancient).
    pub fn with_summarize_middle(mut self, turns: usize) -> Self {
        self.summarize_middle_turns = turns;
        self
    }

    pub fn with_notification(mut self, template: Option<String>) -> Self {
        self.notify_on_gc = true;
        self.notification_template = template;
        self
    }
}

#[async_trait]
impl GcStrategy for HybridStrategy {
    fn name(&self) -> &str {
        "gc_hybrid"
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

        let preserve_recent =
            self.preserve_recent_turns.unwrap_or(config.preserve_recent_turns);
        let preserved = preserved_indices(total, preserve_recent, &config.pinned_turn_indices);

        if preserved.len() >= total {
            let result = GcResult::nothing_to_collect(
                self.name(),
                reason,
                tokens_before,
                "Not enough turns to collect",
            );
            return (history, result);
        }

        let (collectable, young): (Vec<Turn>, Vec<Turn>) =
            turns.into_iter().partition(|t| !preserved.contains(&t.index));

        // Generation split within the collectable region: the trailing M
        // turns are the old generation, anything before them is ancient.
        let ancient_count = collectable.len().saturating_sub(self.summarize_middle_turns);

        let mut truncated = 0usize;
        let mut summarized = 0usize;
        let mut new_history: Vec<Message> = Vec::new();

        if let Some(summarizer) = &self.summarizer {
            let transcript = transcript_for_summary(&collectable);
            match summarizer(transcript).await {
                Ok(summary_text) => {
                    summarized = collectable.len();
                    new_history.push(summary_message(&summary_text));
                }
                Err(e) => {
                    let result = GcResult::failure(
                        self.name(),
                        reason,
                        tokens_before,
                        format!("Summarization failed: {e}"),
                    );
                    return (history, result);
                }
            }
        } else {
            truncated = collectable.len();
        }

        let kept = young.len();
        new_history.extend(flatten_turns(young));
        let tokens_after = estimate_history_tokens(&new_history);

        let mut result = GcResult::new(self.name(), reason);
        result.items_collected = truncated + summarized;
        result.tokens_before = tokens_before;
        result.tokens_after = tokens_after;
        result.details.insert("turns_before".into(), json!(total));
        result
            .details
            .insert("turns_after".into(), json!(kept + usize::from(summarized > 0)));
        result.details.insert("turns_truncated".into(), json!(truncated));
        result.details.insert("turns_summarized".into(), json!(summarized));
        result.details.insert("ancient_turns".into(), json!(ancient_count));
        result.details.insert("preserve_recent".into(), json!(preserve_recent));
        result
            .details
            .insert("summarize_middle".into(), json!(self.summarize_middle_turns));
        result.details.insert("had_summarizer".into(), json!(self.summarizer.is_some()));

        if self.notify_on_gc {
            let template =
                self.notification_template.as_deref().unwrap_or(DEFAULT_NOTIFICATION);
            result.notification = Some(fill_template(
                template,
                truncated + summarized,
                kept,
                tokens_before.saturating_sub(tokens_after),
            ));
        }

        (new_history, result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;

    fn synthetic_history(turns: usize) -> Vec<Message> {
        let mut h = Vec::new();
        for i in 0..turns {
            h.push(Message::user(format!("question number {i}")));
            h.push(Message::model(format!("answer number {i}")));
        }
        h
    }

    fn fixed_summarizer(reply: &'static str) -> Summarizer {
        Arc::new(move |_t: String| async move { Ok(reply.to_string()) }.boxed())
    }

    fn config(preserve: usize) -> GcConfig {
        GcConfig { preserve_recent_turns: preserve, ..Default::default() }
    }

    #[tokio::test]
    async fn with_summarizer_old_and_ancient_collapse_into_one_summary() {
        let strategy = HybridStrategy::new().with_summarizer(fixed_summarizer("gist"));
        let history = synthetic_history(20);
        let (new_history, result) = strategy
            .collect(history, &UsageSnapshot::default(), &config(5), TriggerReason::Threshold)
            .await;

        assert!(result.success);
        assert_eq!(result.details["turns_summarized"], json!(15));
        assert_eq!(result.details["turns_truncated"], json!(0));
        // One summary + 5 young turns of 2 messages.
        assert_eq!(new_history.len(), 11);
        assert!(new_history[0].as_text().unwrap().contains("[Context Summary"));
    }

    #[tokio::test]
    async fn without_summarizer_degrades_to_truncation() {
        let strategy = HybridStrategy::new();
        let history = synthetic_history(20);
        let (new_history, result) = strategy
            .collect(history, &UsageSnapshot::default(), &config(5), TriggerReason::Threshold)
            .await;

        assert!(result.success);
        assert_eq!(result.details["turns_truncated"], json!(15));
        assert_eq!(result.details["turns_summarized"], json!(0));
        assert_eq!(new_history.len(), 10);
        assert_eq!(split_into_turns(&new_history).len(), 5);
    }

    #[tokio::test]
    async fn failing_summarizer_keeps_history_unchanged() {
        let summarizer: Summarizer =
            Arc::new(|_t: String| async move { anyhow::bail!("down") }.boxed());
        let strategy = HybridStrategy::new().with_summarizer(summarizer);
        let history = synthetic_history(12);
        let (new_history, result) = strategy
            .collect(history.clone(), &UsageSnapshot::default(), &config(3), TriggerReason::Threshold)
            .await;
        assert!(!result.success);
        assert_eq!(new_history, history);
    }

    #[tokio::test]
    async fn young_tail_is_suffix_of_original() {
        let strategy = HybridStrategy::new().with_summarizer(fixed_summarizer("s"));
        let history = synthetic_history(15);
        let tail: Vec<Message> = history[history.len() - 6..].to_vec();
        let (new_history, _) = strategy
            .collect(history, &UsageSnapshot::default(), &config(3), TriggerReason::Manual)
            .await;
        assert_eq!(&new_history[new_history.len() - 6..], tail.as_slice());
    }

    #[tokio::test]
    async fn too_few_turns_is_successful_noop() {
        let strategy = HybridStrategy::new();
        let history = synthetic_history(4);
        let (new_history, result) = strategy
            .collect(history.clone(), &UsageSnapshot::default(), &config(5), TriggerReason::Manual)
            .await;
        assert!(result.success);
        assert_eq!(result.items_collected, 0);
        assert_eq!(new_history, history);
    }

    #[tokio::test]
    async fn pinned_turns_count_as_young() {
        let strategy = HybridStrategy::new();
        let history = synthetic_history(12);
        let cfg = GcConfig {
            preserve_recent_turns: 2,
            pinned_turn_indices: vec![0],
            ..Default::default()
        };
        let (new_history, _) = strategy
            .collect(history, &UsageSnapshot::default(), &cfg, TriggerReason::Manual)
            .await;
        assert!(new_history.iter().any(|m| m.as_text() == Some("question number 0")));
    }

    #[tokio::test]
    async fn ancient_count_reflects_middle_window() {
        let strategy = HybridStrategy::new().with_summarize_middle(4);
        let history = synthetic_history(20);
        let (_, result) = strategy
            .collect(history, &UsageSnapshot::default(), &config(5), TriggerReason::Threshold)
            .await;
        // 15 collectable turns, middle window 4 → 11 ancient.
        assert_eq!(result.details["ancient_turns"], json!(11));
    }

    #[tokio::test]
    async fn notification_reports_collected_and_kept() {
        let strategy = HybridStrategy::new().with_notification(None);
        let history = synthetic_history(10);
        let (_, result) = strategy
            .collect(history, &UsageSnapshot::default(), &config(4), TriggerReason::Threshold)
            .await;
        let note = result.notification.unwrap();
        assert!(note.contains("6 turns collected"));
        assert!(note.contains("4 recent turns preserved"));
    }
}
