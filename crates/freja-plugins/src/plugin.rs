// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use freja_model::{ToolResult, ToolSchema};

use crate::CapabilitySet;

/// What a plugin contributes to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Tool,
    Gc,
    Session,
}

/// Whether the main agent or a spawned subagent is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    #[default]
    Main,
    Subagent,
}

/// Declaration of one parameter of a user command, used to parse the
/// free-form argument string at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Declaration of a user-facing command.
///
/// User commands are invoked by the surrounding application directly, not by
/// the model.  When `share_with_model` is set, the command's output is
/// injected into conversation history so subsequent model turns can see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCommand {
    pub name: String,
    pub description: String,
    pub share_with_model: bool,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
}

/// A completion option for command arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCompletion {
    pub value: String,
    pub description: String,
}

/// Rendering hint for permission-approval display details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayFormat {
    Diff,
    Code,
    Json,
    #[default]
    Text,
}

/// Display information a plugin supplies for the permission-approval UI,
/// replacing the default tool-name + JSON-arguments rendering.
#[derive(Debug, Clone)]
pub struct PermissionDisplayInfo {
    /// Brief one-line description, e.g. "Update file: src/main.rs".
    pub summary: String,
    /// Full content to display, e.g. a unified diff.
    pub details: String,
    pub format_hint: DisplayFormat,
    /// Language for syntax highlighting when `format_hint` is `Code`.
    pub language: Option<String>,
    pub truncated: bool,
    pub original_lines: Option<usize>,
}

impl PermissionDisplayInfo {
    pub fn text(summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: details.into(),
            format_hint: DisplayFormat::Text,
            language: None,
            truncated: false,
            original_lines: None,
        }
    }
}

/// Result of prompt enrichment by one plugin.
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    /// The (possibly modified) prompt text.
    pub prompt: String,
    /// Advisory metadata about the enrichment (e.g. detected references).
    pub metadata: serde_json::Map<String, Value>,
}

impl EnrichmentResult {
    pub fn unchanged(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), metadata: serde_json::Map::new() }
    }
}

/// The narrow runtime handle passed to plugins.
///
/// Plugins that need runtime facts (model identity, budget) receive this
/// view instead of a back-reference to the driver.
#[derive(Debug, Clone)]
pub struct RuntimeView {
    pub model_name: String,
    pub context_limit: usize,
    pub agent_type: AgentType,
}

/// Check whether `model_name` matches any of the given glob patterns
/// (`*` matches any run of characters, `?` exactly one).
pub fn model_matches_requirements(model_name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| glob_match(p, model_name))
}

fn glob_match(pattern: &str, value: &str) -> bool {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).map(|r| r.is_match(value)).unwrap_or(false)
}

/// Interface every plugin implements.
///
/// Only `name`, `kind`, and `capabilities` are mandatory; everything else
/// has a no-op default.  The registry consults a method only when the
/// plugin's [`CapabilitySet`] declares the matching capability, so a plugin
/// implements exactly the surface it advertises.
///
/// Capability queries return `Result` so a failing plugin can be logged and
/// skipped for that query without being unexposed.  Tool execution never
/// fails into the caller: errors are [`ToolResult::Err`] values.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    /// Unique identifier for this plugin.
    fn name(&self) -> &str;

    fn kind(&self) -> PluginKind {
        PluginKind::Tool
    }

    fn capabilities(&self) -> CapabilitySet;

    /// Glob patterns for models this plugin requires; `None` means any.
    fn model_requirements(&self) -> Option<Vec<String>> {
        None
    }

    /// Called once when the plugin is exposed.  Failing fast here keeps the
    /// plugin out of the exposed set.
    fn initialize(&mut self, _config: Option<&Value>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the plugin is unexposed.  Best-effort: an error is logged
    /// and the plugin is dropped regardless.
    fn shutdown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tool declarations this plugin exposes to the model.
    fn tool_schemas(&self) -> anyhow::Result<Vec<ToolSchema>> {
        Ok(Vec::new())
    }

    /// Names this plugin executes.  Must be unique across exposed plugins.
    fn executor_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute one of this plugin's tools.
    async fn execute(&self, name: &str, _args: &Value) -> ToolResult {
        ToolResult::err(format!("plugin '{}' has no executor for '{name}'", self.name()))
    }

    /// System-instruction fragment describing this plugin's capabilities.
    fn system_instructions(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    /// Transform the current prompt.  Enrichers must not strip `@<path>`
    /// references; the driver removes the `@` prefix after the pipeline.
    fn enrich_prompt(&self, prompt: &str, _view: &RuntimeView) -> anyhow::Result<EnrichmentResult> {
        Ok(EnrichmentResult::unchanged(prompt))
    }

    /// Tool or command names that bypass permission prompts.
    fn auto_approved_tools(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// User-facing commands this plugin provides.
    fn user_commands(&self) -> anyhow::Result<Vec<UserCommand>> {
        Ok(Vec::new())
    }

    /// Custom rendering for this plugin's tools in the approval UI.
    fn format_permission_request(
        &self,
        _tool_name: &str,
        _args: &Value,
    ) -> Option<PermissionDisplayInfo> {
        None
    }

    /// Completion options for a user command's arguments.
    fn command_completions(&self, _command: &str, _args: &[String]) -> Vec<CommandCompletion> {
        Vec::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Capability;

    struct MinimalPlugin;

    #[async_trait]
    impl ToolPlugin for MinimalPlugin {
        fn name(&self) -> &str {
            "minimal"
        }
        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::empty()
        }
    }

    #[test]
    fn defaults_are_empty() {
        let p = MinimalPlugin;
        assert_eq!(p.kind(), PluginKind::Tool);
        assert!(p.tool_schemas().unwrap().is_empty());
        assert!(p.executor_names().is_empty());
        assert!(p.system_instructions().unwrap().is_none());
        assert!(p.auto_approved_tools().unwrap().is_empty());
        assert!(p.user_commands().unwrap().is_empty());
        assert!(p.model_requirements().is_none());
    }

    #[tokio::test]
    async fn default_execute_is_an_error_value() {
        let p = MinimalPlugin;
        let out = p.execute("nope", &serde_json::json!({})).await;
        assert!(out.is_error());
    }

    #[test]
    fn default_enrichment_passes_prompt_through() {
        let p = MinimalPlugin;
        let view = RuntimeView {
            model_name: "m".into(),
            context_limit: 1000,
            agent_type: AgentType::Main,
        };
        let r = p.enrich_prompt("keep me", &view).unwrap();
        assert_eq!(r.prompt, "keep me");
        assert!(r.metadata.is_empty());
    }

    // ── Model requirement matching ────────────────────────────────────────────

    #[test]
    fn model_matches_exact_pattern() {
        assert!(model_matches_requirements("gpt-4o", &["gpt-4o".into()]));
    }

    #[test]
    fn model_matches_wildcard_pattern() {
        assert!(model_matches_requirements(
            "gemini-2.5-pro-preview",
            &["gemini-2.5-*".into()]
        ));
    }

    #[test]
    fn model_rejects_non_matching_patterns() {
        assert!(!model_matches_requirements("gpt-4o", &["claude-*".into()]));
    }

    #[test]
    fn model_matches_any_of_several_patterns() {
        let patterns = vec!["claude-*".to_string(), "gpt-*".to_string()];
        assert!(model_matches_requirements("gpt-4o-mini", &patterns));
    }

    #[test]
    fn question_mark_matches_single_char() {
        assert!(model_matches_requirements("m1", &["m?".into()]));
        assert!(!model_matches_requirements("m12", &["m?".into()]));
    }

    #[test]
    fn glob_is_case_sensitive() {
        assert!(!model_matches_requirements("GPT-4o", &["gpt-*".into()]));
    }

    #[test]
    fn capability_set_drives_registry_queries() {
        let caps = CapabilitySet::empty().with(Capability::Tools);
        assert!(caps.contains(Capability::Tools));
        assert!(!caps.contains(Capability::UserCommands));
    }
}
