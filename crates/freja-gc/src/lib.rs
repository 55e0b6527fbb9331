// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod hybrid;
mod strategy;
mod summarize;
mod truncate;
mod turns;

pub use hybrid::HybridStrategy;
pub use strategy::{GcConfig, GcResult, GcStrategy, Summarizer, TriggerReason, UsageSnapshot};
pub use summarize::SummarizeStrategy;
pub use truncate::TruncateStrategy;
pub use turns::{
    flatten_turns, notification_message, preserved_indices, split_into_turns, summary_message,
    transcript_for_summary, Turn,
};
