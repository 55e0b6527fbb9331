// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;
use serde_json::Value;

use freja_config::{ArgumentRules, DefaultPolicy, PermissionConfig};

/// Name of the canonical CLI-dispatch tool.  Its rule signature is the
/// joined command string rather than the `name(k=v)` form.
pub const CLI_TOOL_NAME: &str = "shell";

/// Outcome of policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
    /// Policy undecided; the approval channel resolves it.
    AskChannel,
}

/// Which rule tier produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Blacklist,
    Whitelist,
    SessionBlacklist,
    SessionWhitelist,
    Default,
}

/// Details about why a permission decision was made.
#[derive(Debug, Clone)]
pub struct PolicyMatch {
    pub decision: PermissionDecision,
    pub reason: String,
    pub matched_rule: Option<String>,
    pub rule_type: RuleType,
}

impl PolicyMatch {
    fn new(decision: PermissionDecision, reason: String, rule_type: RuleType) -> Self {
        Self { decision, reason, matched_rule: None, rule_type }
    }

    fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }
}

/// A glob pattern compiled for repeated matching.  `*` matches any run of
/// characters, `?` exactly one; matching is case-sensitive and there is no
/// escape syntax.
#[derive(Debug, Clone)]
struct CompiledPattern {
    raw: String,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Option<Self> {
        glob_to_regex(pattern).map(|regex| Self { raw: pattern.to_string(), regex })
    }

    fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// Convert a shell-style glob pattern to a [`Regex`].
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Policy engine mapping a tool call to a permission decision.
///
/// Evaluation is a strict priority chain; the first rule to fire wins:
///
/// 1. session blacklist
/// 2. static blacklist (tools, patterns, argument rules)
/// 3. session whitelist
/// 4. static whitelist (symmetric to the blacklist)
/// 5. session default policy, when set
/// 6. base default policy
///
/// A blacklist match at any level always beats any whitelist match at the
/// same or lower priority, and session rules outrank static rules of the
/// same color so one session can be loosened or tightened without editing
/// config.
#[derive(Debug)]
pub struct PermissionPolicy {
    default_policy: DefaultPolicy,
    session_default: Option<DefaultPolicy>,

    blacklist_tools: Vec<String>,
    blacklist_patterns: Vec<CompiledPattern>,
    blacklist_arguments: ArgumentRules,

    whitelist_tools: Vec<String>,
    whitelist_patterns: Vec<CompiledPattern>,
    whitelist_arguments: ArgumentRules,

    session_blacklist: Vec<CompiledPattern>,
    session_whitelist: Vec<CompiledPattern>,
}

impl PermissionPolicy {
    pub fn from_config(config: &PermissionConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<CompiledPattern> {
            patterns.iter().filter_map(|p| CompiledPattern::compile(p)).collect()
        };
        Self {
            default_policy: config.default_policy,
            session_default: None,
            blacklist_tools: config.blacklist.tools.clone(),
            blacklist_patterns: compile(&config.blacklist.patterns),
            blacklist_arguments: config.blacklist.arguments.clone(),
            whitelist_tools: config.whitelist.tools.clone(),
            whitelist_patterns: compile(&config.whitelist.patterns),
            whitelist_arguments: config.whitelist.arguments.clone(),
            session_blacklist: Vec::new(),
            session_whitelist: Vec::new(),
        }
    }

    /// Policy with no static rules and the given base default.
    pub fn with_default(default_policy: DefaultPolicy) -> Self {
        let mut config = PermissionConfig::default();
        config.blacklist = Default::default();
        config.whitelist = Default::default();
        config.default_policy = default_policy;
        Self::from_config(&config)
    }

    /// Evaluate permission for a tool call.
    pub fn check(&self, tool_name: &str, args: &Value) -> PolicyMatch {
        let signature = build_signature(tool_name, args);

        // 1. Session blacklist (highest priority).  One refinement: an
        // explicit session-whitelist entry (the literal tool name) overrides
        // a session-blacklist *pattern*, so "createPlan" can be carved out
        // of "create*".  An exact blacklist entry still beats everything.
        if let Some(p) = match_any(&self.session_blacklist, tool_name, &signature) {
            let blacklist_is_exact = p == tool_name;
            let whitelisted_exactly =
                self.session_whitelist.iter().any(|w| w.raw == tool_name);
            if blacklist_is_exact || !whitelisted_exactly {
                return PolicyMatch::new(
                    PermissionDecision::Deny,
                    format!("Tool '{tool_name}' is blacklisted for this session"),
                    RuleType::SessionBlacklist,
                )
                .with_rule(p);
            }
        }

        // 2. Static blacklist
        if let Some(m) = self.check_static(
            tool_name,
            args,
            &signature,
            &self.blacklist_tools,
            &self.blacklist_patterns,
            &self.blacklist_arguments,
            PermissionDecision::Deny,
        ) {
            return m;
        }

        // 3. Session whitelist
        if let Some(p) = match_any(&self.session_whitelist, tool_name, &signature) {
            return PolicyMatch::new(
                PermissionDecision::Allow,
                format!("Tool '{tool_name}' is whitelisted for this session"),
                RuleType::SessionWhitelist,
            )
            .with_rule(p);
        }

        // 4. Static whitelist
        if let Some(m) = self.check_static(
            tool_name,
            args,
            &signature,
            &self.whitelist_tools,
            &self.whitelist_patterns,
            &self.whitelist_arguments,
            PermissionDecision::Allow,
        ) {
            return m;
        }

        // 5./6. Session default overrides base default.
        let (default, reason_scope) = match self.session_default {
            Some(d) => (d, "session default policy"),
            None => (self.default_policy, "default policy"),
        };
        match default {
            DefaultPolicy::Allow => PolicyMatch::new(
                PermissionDecision::Allow,
                format!("Allowed by {reason_scope}"),
                RuleType::Default,
            ),
            DefaultPolicy::Deny => PolicyMatch::new(
                PermissionDecision::Deny,
                format!("Denied by {reason_scope}"),
                RuleType::Default,
            ),
            DefaultPolicy::Ask => PolicyMatch::new(
                PermissionDecision::AskChannel,
                "No matching rule, requires channel approval".to_string(),
                RuleType::Default,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_static(
        &self,
        tool_name: &str,
        args: &Value,
        signature: &str,
        tools: &[String],
        patterns: &[CompiledPattern],
        argument_rules: &ArgumentRules,
        decision: PermissionDecision,
    ) -> Option<PolicyMatch> {
        let (rule_type, color) = match decision {
            PermissionDecision::Deny => (RuleType::Blacklist, "blacklist"),
            _ => (RuleType::Whitelist, "whitelist"),
        };

        if tools.iter().any(|t| t == tool_name) {
            return Some(
                PolicyMatch::new(
                    decision,
                    format!("Tool '{tool_name}' is {color}ed"),
                    rule_type,
                )
                .with_rule(tool_name),
            );
        }

        for pattern in patterns {
            if pattern.matches(signature) {
                return Some(
                    PolicyMatch::new(
                        decision,
                        format!("Command matches {color} pattern: {}", pattern.raw),
                        rule_type,
                    )
                    .with_rule(&pattern.raw),
                );
            }
        }

        if let Some(arg_rules) = argument_rules.get(tool_name) {
            for (arg_name, values) in arg_rules {
                let Some(arg_value) = args.get(arg_name).and_then(Value::as_str) else {
                    continue;
                };
                for value in values {
                    let hit = match decision {
                        // Blocked values match by prefix OR whitespace-token
                        // containment; allowed values by prefix only.
                        PermissionDecision::Deny => {
                            arg_value.starts_with(value.as_str())
                                || arg_value.split_whitespace().any(|tok| tok == value)
                        }
                        _ => arg_value.starts_with(value.as_str()),
                    };
                    if hit {
                        let verb = match decision {
                            PermissionDecision::Deny => "contains blocked",
                            _ => "matches allowed",
                        };
                        return Some(
                            PolicyMatch::new(
                                decision,
                                format!("Argument '{arg_name}' {verb} value: {value}"),
                                rule_type,
                            )
                            .with_rule(format!("{arg_name}={value}")),
                        );
                    }
                }
            }
        }

        None
    }

    // ── Session rules ────────────────────────────────────────────────────────

    /// Add a glob pattern to the session blacklist.
    pub fn add_session_blacklist(&mut self, pattern: &str) {
        if let Some(p) = CompiledPattern::compile(pattern) {
            self.session_blacklist.push(p);
        }
    }

    /// Add a glob pattern to the session whitelist.  The session blacklist
    /// still takes priority.
    pub fn add_session_whitelist(&mut self, pattern: &str) {
        if let Some(p) = CompiledPattern::compile(pattern) {
            self.session_whitelist.push(p);
        }
    }

    /// Override the base default policy for this session.
    pub fn set_session_default(&mut self, default: Option<DefaultPolicy>) {
        self.session_default = default;
    }

    /// Drop all session-level rules, including the session default.
    pub fn clear_session_rules(&mut self) {
        self.session_blacklist.clear();
        self.session_whitelist.clear();
        self.session_default = None;
    }

    /// Add tool names to the static whitelist (used to merge plugin
    /// auto-approved tools at configuration time).
    pub fn add_whitelist_tools(&mut self, tools: impl IntoIterator<Item = String>) {
        for t in tools {
            if !self.whitelist_tools.contains(&t) {
                self.whitelist_tools.push(t);
            }
        }
    }
}

fn match_any(patterns: &[CompiledPattern], tool_name: &str, signature: &str) -> Option<String> {
    patterns
        .iter()
        .find(|p| p.matches(tool_name) || p.matches(signature))
        .map(|p| p.raw.clone())
}

/// Build the signature a rule pattern is matched against.
///
/// The canonical CLI tool produces the joined command string so patterns
/// like `"git *"` work naturally; any other tool produces
/// `name(k=v, …)` with keys sorted.
pub fn build_signature(tool_name: &str, args: &Value) -> String {
    if tool_name == CLI_TOOL_NAME {
        let command = args.get("command").and_then(Value::as_str).unwrap_or("");
        let extra: Vec<String> = args
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().map(render_value).collect())
            .unwrap_or_default();
        if extra.is_empty() {
            command.to_string()
        } else {
            format!("{command} {}", extra.join(" "))
        }
    } else {
        let mut pairs: Vec<(String, String)> = args
            .as_object()
            .map(|o| o.iter().map(|(k, v)| (k.clone(), render_value(v))).collect())
            .unwrap_or_default();
        pairs.sort();
        let joined =
            pairs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");
        format!("{tool_name}({joined})")
    }
}

/// Render an argument value the way signatures display it: strings bare,
/// everything else as compact JSON.
fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use freja_config::ListRules;

    fn policy_from(default: DefaultPolicy, blacklist: ListRules, whitelist: ListRules) -> PermissionPolicy {
        let mut cfg = PermissionConfig::default();
        cfg.default_policy = default;
        cfg.blacklist = blacklist;
        cfg.whitelist = whitelist;
        PermissionPolicy::from_config(&cfg)
    }

    fn rules(tools: &[&str], patterns: &[&str]) -> ListRules {
        ListRules {
            tools: tools.iter().map(|s| s.to_string()).collect(),
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            arguments: Default::default(),
        }
    }

    // ── Signatures ────────────────────────────────────────────────────────────

    #[test]
    fn cli_signature_is_joined_command() {
        let sig = build_signature("shell", &json!({"command": "git", "args": ["status", "-s"]}));
        assert_eq!(sig, "git status -s");
    }

    #[test]
    fn cli_signature_without_args_is_bare_command() {
        let sig = build_signature("shell", &json!({"command": "ls"}));
        assert_eq!(sig, "ls");
    }

    #[test]
    fn non_cli_signature_sorts_keys() {
        let sig = build_signature("write_file", &json!({"path": "/tmp/x", "content": "hi"}));
        assert_eq!(sig, "write_file(content=hi, path=/tmp/x)");
    }

    // ── Priority chain ────────────────────────────────────────────────────────

    #[test]
    fn blacklist_beats_whitelist_for_same_tool() {
        let p = policy_from(
            DefaultPolicy::Allow,
            rules(&["danger"], &[]),
            rules(&["danger"], &[]),
        );
        let m = p.check("danger", &json!({}));
        assert_eq!(m.decision, PermissionDecision::Deny);
        assert_eq!(m.rule_type, RuleType::Blacklist);
    }

    #[test]
    fn session_blacklist_beats_session_whitelist() {
        let mut p = policy_from(DefaultPolicy::Allow, rules(&[], &[]), rules(&[], &[]));
        p.add_session_whitelist("tool_x");
        p.add_session_blacklist("tool_x");
        assert_eq!(p.check("tool_x", &json!({})).decision, PermissionDecision::Deny);
    }

    #[test]
    fn static_blacklist_outranks_session_whitelist() {
        let mut p = policy_from(DefaultPolicy::Deny, rules(&["x"], &[]), rules(&[], &[]));
        p.add_session_whitelist("x");
        assert_eq!(p.check("x", &json!({})).decision, PermissionDecision::Deny);
    }

    #[test]
    fn session_whitelist_overrides_deny_default() {
        let mut p = policy_from(DefaultPolicy::Deny, rules(&[], &[]), rules(&[], &[]));
        assert_eq!(p.check("x", &json!({})).decision, PermissionDecision::Deny);
        p.add_session_whitelist("x");
        assert_eq!(p.check("x", &json!({})).decision, PermissionDecision::Allow);
        p.clear_session_rules();
        assert_eq!(p.check("x", &json!({})).decision, PermissionDecision::Deny);
    }

    #[test]
    fn explicit_session_whitelist_overrides_blacklist_pattern() {
        let mut p = policy_from(DefaultPolicy::Deny, rules(&[], &[]), rules(&[], &[]));
        p.add_session_blacklist("create*");
        p.add_session_whitelist("createPlan");

        let m = p.check("createPlan", &json!({}));
        assert_eq!(m.decision, PermissionDecision::Allow);
        assert_eq!(m.rule_type, RuleType::SessionWhitelist);

        let m = p.check("createIssue", &json!({}));
        assert_eq!(m.decision, PermissionDecision::Deny);
        assert_eq!(m.rule_type, RuleType::SessionBlacklist);
    }

    #[test]
    fn exact_session_blacklist_beats_exact_whitelist() {
        let mut p = policy_from(DefaultPolicy::Allow, rules(&[], &[]), rules(&[], &[]));
        p.add_session_whitelist("dangerousTool");
        p.add_session_blacklist("dangerousTool");
        let m = p.check("dangerousTool", &json!({}));
        assert_eq!(m.decision, PermissionDecision::Deny);
        assert_eq!(m.rule_type, RuleType::SessionBlacklist);
    }

    #[test]
    fn static_pattern_matches_cli_signature() {
        let p = policy_from(
            DefaultPolicy::Deny,
            rules(&[], &[]),
            rules(&[], &["git *"]),
        );
        let m = p.check("shell", &json!({"command": "git", "args": ["status"]}));
        assert_eq!(m.decision, PermissionDecision::Allow);
        assert_eq!(m.matched_rule.as_deref(), Some("git *"));
    }

    #[test]
    fn blacklist_pattern_matches_signature() {
        let p = policy_from(DefaultPolicy::Allow, rules(&[], &["sudo *"]), rules(&[], &[]));
        let m = p.check("shell", &json!({"command": "sudo", "args": ["reboot"]}));
        assert_eq!(m.decision, PermissionDecision::Deny);
        assert_eq!(m.rule_type, RuleType::Blacklist);
    }

    #[test]
    fn glob_is_case_sensitive() {
        let p = policy_from(DefaultPolicy::Deny, rules(&[], &[]), rules(&[], &["Git *"]));
        let m = p.check("shell", &json!({"command": "git", "args": ["status"]}));
        assert_eq!(m.decision, PermissionDecision::Deny);
    }

    // ── Argument rules ────────────────────────────────────────────────────────

    fn arg_rules(tool: &str, arg: &str, values: &[&str]) -> ListRules {
        let mut rules = ListRules::default();
        rules.arguments.insert(
            tool.to_string(),
            std::collections::HashMap::from([(
                arg.to_string(),
                values.iter().map(|s| s.to_string()).collect(),
            )]),
        );
        rules
    }

    #[test]
    fn blocked_argument_prefix_denies() {
        let p = policy_from(
            DefaultPolicy::Allow,
            arg_rules("shell", "command", &["sudo"]),
            ListRules::default(),
        );
        let m = p.check("shell", &json!({"command": "sudo reboot"}));
        assert_eq!(m.decision, PermissionDecision::Deny);
        assert!(m.reason.contains("blocked value"));
    }

    #[test]
    fn blocked_argument_token_containment_denies() {
        let p = policy_from(
            DefaultPolicy::Allow,
            arg_rules("shell", "command", &["rm"]),
            ListRules::default(),
        );
        // "rm" appears as a whitespace token, not as a prefix.
        let m = p.check("shell", &json!({"command": "find . -delete-with rm"}));
        assert_eq!(m.decision, PermissionDecision::Deny);
    }

    #[test]
    fn blocked_token_must_be_whole_word() {
        let p = policy_from(
            DefaultPolicy::Allow,
            arg_rules("shell", "command", &["rm"]),
            ListRules::default(),
        );
        // "formula" contains "rm" as a substring but not as a token or prefix.
        let m = p.check("shell", &json!({"command": "cat formula"}));
        assert_eq!(m.decision, PermissionDecision::Allow);
    }

    #[test]
    fn whitelist_argument_matches_by_prefix_only() {
        let p = policy_from(
            DefaultPolicy::Deny,
            ListRules::default(),
            arg_rules("shell", "command", &["git"]),
        );
        assert_eq!(
            p.check("shell", &json!({"command": "git status"})).decision,
            PermissionDecision::Allow
        );
        // Token containment must NOT whitelist.
        assert_eq!(
            p.check("shell", &json!({"command": "sudo git push"})).decision,
            PermissionDecision::Deny
        );
    }

    #[test]
    fn argument_rules_ignore_non_string_values() {
        let p = policy_from(
            DefaultPolicy::Allow,
            arg_rules("tool", "count", &["7"]),
            ListRules::default(),
        );
        assert_eq!(p.check("tool", &json!({"count": 7})).decision, PermissionDecision::Allow);
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn ask_default_requests_channel() {
        let p = policy_from(DefaultPolicy::Ask, ListRules::default(), ListRules::default());
        let m = p.check("anything", &json!({}));
        assert_eq!(m.decision, PermissionDecision::AskChannel);
        assert_eq!(m.rule_type, RuleType::Default);
    }

    #[test]
    fn session_default_overrides_base_default() {
        let mut p = policy_from(DefaultPolicy::Deny, ListRules::default(), ListRules::default());
        p.set_session_default(Some(DefaultPolicy::Allow));
        let m = p.check("anything", &json!({}));
        assert_eq!(m.decision, PermissionDecision::Allow);
        assert!(m.reason.contains("session default"));
    }

    #[test]
    fn session_default_does_not_override_blacklist() {
        let mut p = policy_from(DefaultPolicy::Deny, rules(&["bad"], &[]), ListRules::default());
        p.set_session_default(Some(DefaultPolicy::Allow));
        assert_eq!(p.check("bad", &json!({})).decision, PermissionDecision::Deny);
    }

    #[test]
    fn clear_session_rules_resets_session_default() {
        let mut p = policy_from(DefaultPolicy::Deny, ListRules::default(), ListRules::default());
        p.set_session_default(Some(DefaultPolicy::Allow));
        p.clear_session_rules();
        assert_eq!(p.check("x", &json!({})).decision, PermissionDecision::Deny);
    }

    #[test]
    fn add_whitelist_tools_deduplicates() {
        let mut p = policy_from(DefaultPolicy::Deny, ListRules::default(), ListRules::default());
        p.add_whitelist_tools(vec!["a".to_string(), "a".to_string()]);
        assert_eq!(p.check("a", &json!({})).decision, PermissionDecision::Allow);
    }
}
