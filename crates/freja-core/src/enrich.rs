// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::OnceLock;

use regex::Regex;

/// Matches `@<path>` references in prompts (e.g. `@file.png`,
/// `@src/main.rs`).  Enrichment plugins leave these intact; the driver
/// strips the `@` prefix in a final pass after the pipeline has run.
fn at_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@([\w./\-]+(?:\.\w+)?)").expect("valid at-ref pattern"))
}

/// Remove the `@` prefix from path-like references, leaving the path text
/// in place.  Idempotent: a second application changes nothing.
pub fn strip_at_references(prompt: &str) -> String {
    at_reference_pattern().replace_all(prompt, "$1").to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_simple_file_reference() {
        assert_eq!(strip_at_references("look at @notes.txt please"), "look at notes.txt please");
    }

    #[test]
    fn strips_path_reference() {
        assert_eq!(strip_at_references("open @src/main.rs"), "open src/main.rs");
    }

    #[test]
    fn strips_multiple_references() {
        assert_eq!(strip_at_references("diff @a.rs and @b.rs"), "diff a.rs and b.rs");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(strip_at_references("no references here"), "no references here");
    }

    #[test]
    fn bare_at_sign_is_untouched() {
        assert_eq!(strip_at_references("a @ b"), "a @ b");
    }

    #[test]
    fn stripping_is_idempotent() {
        let once = strip_at_references("see @dir/file.md and @other.py");
        let twice = strip_at_references(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn hyphenated_and_dotted_paths_survive() {
        assert_eq!(
            strip_at_references("check @my-lib/v1.2/readme.md"),
            "check my-lib/v1.2/readme.md"
        );
    }
}
