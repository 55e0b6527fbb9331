// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Static per-model context-window table.
//!
//! Approximate limits; providers that expose a live limit can override the
//! catalog value at the adapter level.  Lookup falls back to prefix matching
//! for dated/versioned model names, then to [`DEFAULT_CONTEXT_LIMIT`].

/// Context limit assumed for models absent from the catalog.
pub const DEFAULT_CONTEXT_LIMIT: usize = 128_000;

/// Known model context windows (total tokens).
const MODEL_CONTEXT_LIMITS: &[(&str, usize)] = &[
    // OpenAI
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4.1-mini", 1_047_576),
    ("o3", 200_000),
    ("o4-mini", 200_000),
    // Anthropic
    ("claude-3-5-sonnet", 200_000),
    ("claude-3-5-haiku", 200_000),
    ("claude-sonnet-4", 200_000),
    ("claude-opus-4", 200_000),
    // Google
    ("gemini-1.5-pro", 2_097_152),
    ("gemini-1.5-flash", 1_048_576),
    ("gemini-2.0-flash", 1_048_576),
    ("gemini-2.5-pro", 1_048_576),
    ("gemini-2.5-flash", 1_048_576),
    // Open-weight
    ("llama-3.1", 131_072),
    ("llama-3.3", 131_072),
    ("mistral-large", 131_072),
    ("qwen2.5", 131_072),
];

/// Look up the context window for `model`, falling back to
/// [`DEFAULT_CONTEXT_LIMIT`] for unknown names.
pub fn context_limit(model: &str) -> usize {
    context_limit_or(model, DEFAULT_CONTEXT_LIMIT)
}

/// Look up the context window for `model` with a caller-supplied default.
///
/// Tries an exact match first, then treats catalog names as prefixes so that
/// dated variants (`gpt-4o-2024-11-20`, `claude-3-5-sonnet-latest`) resolve
/// to their family entry.
pub fn context_limit_or(model: &str, default: usize) -> usize {
    for (name, limit) in MODEL_CONTEXT_LIMITS {
        if *name == model {
            return *limit;
        }
    }
    // Longest-prefix match so "gpt-4.1-mini" wins over "gpt-4.1".
    let mut best: Option<(usize, usize)> = None;
    for (name, limit) in MODEL_CONTEXT_LIMITS {
        if model.starts_with(name) && best.map_or(true, |(len, _)| name.len() > len) {
            best = Some((name.len(), *limit));
        }
    }
    best.map(|(_, limit)| limit).unwrap_or(default)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_returns_catalog_limit() {
        assert_eq!(context_limit("gpt-4o"), 128_000);
        assert_eq!(context_limit("gemini-1.5-pro"), 2_097_152);
    }

    #[test]
    fn prefix_match_resolves_dated_variants() {
        assert_eq!(context_limit("claude-3-5-sonnet-20241022"), 200_000);
        assert_eq!(context_limit("gemini-2.0-flash-exp"), 1_048_576);
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(context_limit("gpt-4o-mini-2024-07-18"), 128_000);
        // "o4-mini" must not be shadowed by any shorter entry
        assert_eq!(context_limit("o4-mini-2025-04-16"), 200_000);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        assert_eq!(context_limit("totally-unknown"), DEFAULT_CONTEXT_LIMIT);
    }

    #[test]
    fn caller_default_is_respected() {
        assert_eq!(context_limit_or("totally-unknown", 42), 42);
    }
}
