// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{json, Value};

use freja_config::{DefaultPolicy, PermissionConfig};

use crate::{
    create_channel, Channel, ChannelDecision, ChannelResponse, PermissionDecision,
    PermissionPolicy, PermissionRequest, RequestContext, TimeoutDefault,
};

/// Name of the probe tool a model can call to check a permission before
/// attempting an execution.  The probe itself is never permission-checked.
pub const ASK_PERMISSION_TOOL: &str = "ask_permission";

/// One entry in the append-only permission audit log.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub tool_name: String,
    pub arguments: Value,
    /// `"allow"` or `"deny"`.
    pub decision: String,
    pub reason: String,
}

/// Permission enforcement: policy evaluation plus out-of-band approval.
///
/// Every call to [`check_permission`](Self::check_permission) appends
/// exactly one audit entry, whatever the decision path.  Channel responses
/// that carry session semantics (`allow_session`, `deny_session`,
/// `allow_all`) mutate the policy's session state before the decision is
/// returned.
pub struct PermissionEngine {
    policy: PermissionPolicy,
    channel: Option<Box<dyn Channel>>,
    timeout_seconds: u64,
    default_on_timeout: TimeoutDefault,
    audit: Vec<AuditEntry>,
}

impl PermissionEngine {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            policy,
            channel: None,
            timeout_seconds: 30,
            default_on_timeout: TimeoutDefault::Deny,
            audit: Vec::new(),
        }
    }

    /// Build the engine, policy, and channel from a permission config.
    pub fn from_config(config: &PermissionConfig) -> anyhow::Result<Self> {
        let mut engine = Self::new(PermissionPolicy::from_config(config));
        engine.timeout_seconds = config.channel.timeout;
        engine.channel = Some(create_channel(&config.channel)?);
        Ok(engine)
    }

    pub fn with_channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn set_default_on_timeout(&mut self, default: TimeoutDefault) {
        self.default_on_timeout = default;
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut PermissionPolicy {
        &mut self.policy
    }

    /// Merge plugin auto-approved tool names into the static whitelist.
    pub fn add_whitelist_tools(&mut self, tools: impl IntoIterator<Item = String>) {
        self.policy.add_whitelist_tools(tools);
    }

    /// Decide whether a tool execution is permitted.
    ///
    /// Returns `(allowed, reason)`.  Ambiguous outcomes are resolved by the
    /// approval channel; without one they deny.
    pub async fn check_permission(
        &mut self,
        tool_name: &str,
        args: &Value,
        context: RequestContext,
    ) -> (bool, String) {
        let matched = self.policy.check(tool_name, args);
        match matched.decision {
            PermissionDecision::Allow => {
                self.log(tool_name, args, true, &matched.reason);
                (true, matched.reason)
            }
            PermissionDecision::Deny => {
                self.log(tool_name, args, false, &matched.reason);
                (false, matched.reason)
            }
            PermissionDecision::AskChannel => {
                let Some(channel) = &self.channel else {
                    let reason = "No approval channel configured".to_string();
                    self.log(tool_name, args, false, &reason);
                    return (false, reason);
                };
                let mut request = PermissionRequest::create(
                    tool_name,
                    args.clone(),
                    self.timeout_seconds,
                    context,
                );
                request.default_on_timeout = self.default_on_timeout;
                let response = channel.request_permission(&request).await;
                self.apply_channel_response(tool_name, args, response)
            }
        }
    }

    /// Executor behind the [`ASK_PERMISSION_TOOL`] probe: lets the model
    /// check a permission proactively without running the tool.
    pub async fn ask_permission(&mut self, args: &Value, context: RequestContext) -> Value {
        let Some(tool_name) = args.get("tool_name").and_then(Value::as_str) else {
            return json!({ "error": "tool_name is required" });
        };
        let tool_name = tool_name.to_string();
        let tool_args = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let (allowed, reason) = self.check_permission(&tool_name, &tool_args, context).await;
        json!({ "allowed": allowed, "reason": reason, "tool_name": tool_name })
    }

    fn apply_channel_response(
        &mut self,
        tool_name: &str,
        args: &Value,
        response: ChannelResponse,
    ) -> (bool, String) {
        match response.decision {
            ChannelDecision::Allow | ChannelDecision::AllowOnce => {
                self.log(tool_name, args, true, &response.reason);
                (true, response.reason)
            }
            ChannelDecision::AllowSession => {
                let pattern =
                    response.remember_pattern.clone().unwrap_or_else(|| tool_name.to_string());
                self.policy.add_session_whitelist(&pattern);
                self.log(tool_name, args, true, &format!("Session whitelist: {pattern}"));
                (true, response.reason)
            }
            ChannelDecision::Deny => {
                self.log(tool_name, args, false, &response.reason);
                (false, response.reason)
            }
            ChannelDecision::DenySession => {
                let pattern =
                    response.remember_pattern.clone().unwrap_or_else(|| tool_name.to_string());
                self.policy.add_session_blacklist(&pattern);
                self.log(tool_name, args, false, &format!("Session blacklist: {pattern}"));
                (false, response.reason)
            }
            ChannelDecision::AllowAll => {
                self.policy.set_session_default(Some(DefaultPolicy::Allow));
                self.log(tool_name, args, true, "Session default set to allow");
                (true, response.reason)
            }
            ChannelDecision::Timeout => {
                self.log(tool_name, args, false, "Channel timeout");
                (false, response.reason)
            }
        }
    }

    fn log(&mut self, tool_name: &str, args: &Value, allowed: bool, reason: &str) {
        self.audit.push(AuditEntry {
            tool_name: tool_name.to_string(),
            arguments: args.clone(),
            decision: if allowed { "allow" } else { "deny" }.to_string(),
            reason: reason.to_string(),
        });
    }

    /// The append-only audit log of every decision made so far.
    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit
    }

    pub fn clear_audit_log(&mut self) {
        self.audit.clear();
    }

    /// Best-effort channel shutdown.
    pub fn shutdown(&self) {
        if let Some(channel) = &self.channel {
            channel.shutdown();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::*;

    /// Channel returning a preset sequence of responses.
    struct StubChannel {
        responses: Mutex<Vec<ChannelResponse>>,
    }

    impl StubChannel {
        fn respond_with(decision: ChannelDecision) -> Self {
            Self {
                responses: Mutex::new(vec![ChannelResponse::new("", decision, "stubbed")]),
            }
        }

        fn with_pattern(decision: ChannelDecision, pattern: &str) -> Self {
            Self {
                responses: Mutex::new(vec![
                    ChannelResponse::new("", decision, "stubbed").remembered(pattern)
                ]),
            }
        }
    }

    #[async_trait]
    impl Channel for StubChannel {
        fn name(&self) -> &str {
            "stub"
        }
        async fn request_permission(&self, request: &PermissionRequest) -> ChannelResponse {
            let mut responses = self.responses.lock().unwrap();
            let mut r = if responses.is_empty() {
                ChannelResponse::deny("", "exhausted")
            } else {
                responses.remove(0)
            };
            r.request_id = request.request_id.clone();
            r
        }
    }

    fn asking_engine(channel: StubChannel) -> PermissionEngine {
        PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Ask))
            .with_channel(Box::new(channel))
    }

    // ── Policy-decided paths ──────────────────────────────────────────────────

    #[tokio::test]
    async fn allow_default_allows_without_channel() {
        let mut engine =
            PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Allow));
        let (allowed, _) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn deny_default_denies_without_channel() {
        let mut engine =
            PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Deny));
        let (allowed, reason) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(!allowed);
        assert!(reason.contains("default"));
    }

    #[tokio::test]
    async fn ask_without_channel_denies() {
        let mut engine =
            PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Ask));
        let (allowed, reason) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(!allowed);
        assert!(reason.contains("channel"));
    }

    // ── Channel-decided paths ─────────────────────────────────────────────────

    #[tokio::test]
    async fn channel_allow_permits_once() {
        let mut engine = asking_engine(StubChannel::respond_with(ChannelDecision::Allow));
        let (allowed, _) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(allowed);
        // No session mutation: a second identical check asks again and the
        // exhausted stub denies.
        let (allowed, _) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(!allowed);
    }

    #[tokio::test]
    async fn allow_session_adds_remember_pattern() {
        let mut engine =
            asking_engine(StubChannel::with_pattern(ChannelDecision::AllowSession, "git *"));
        let args = json!({"command": "git status"});
        let (allowed, _) = engine
            .check_permission(crate::CLI_TOOL_NAME, &args, RequestContext::default())
            .await;
        assert!(allowed);
        // Now decided by the session whitelist, no channel round-trip.
        let (allowed, reason) = engine
            .check_permission(crate::CLI_TOOL_NAME, &args, RequestContext::default())
            .await;
        assert!(allowed);
        assert!(reason.contains("session"), "unexpected reason: {reason}");
    }

    #[tokio::test]
    async fn allow_session_without_pattern_falls_back_to_tool_name() {
        let mut engine = asking_engine(StubChannel::respond_with(ChannelDecision::AllowSession));
        engine.check_permission("my_tool", &json!({}), RequestContext::default()).await;
        let (allowed, _) =
            engine.check_permission("my_tool", &json!({}), RequestContext::default()).await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn deny_session_blocks_future_calls() {
        let mut engine = asking_engine(StubChannel::respond_with(ChannelDecision::DenySession));
        let (allowed, _) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(!allowed);
        let (allowed, reason) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(!allowed);
        assert!(reason.contains("session"));
    }

    #[tokio::test]
    async fn allow_all_sets_session_default() {
        let mut engine = asking_engine(StubChannel::respond_with(ChannelDecision::AllowAll));
        let (allowed, _) =
            engine.check_permission("first", &json!({}), RequestContext::default()).await;
        assert!(allowed);
        // A completely different tool is now allowed without the channel.
        let (allowed, reason) =
            engine.check_permission("second", &json!({}), RequestContext::default()).await;
        assert!(allowed);
        assert!(reason.contains("session default"), "unexpected reason: {reason}");
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_regular_deny() {
        let mut engine = asking_engine(StubChannel::respond_with(ChannelDecision::Timeout));
        let (allowed, _) =
            engine.check_permission("t", &json!({}), RequestContext::default()).await;
        assert!(!allowed);
        assert_eq!(engine.audit_log().last().unwrap().decision, "deny");
    }

    // ── Audit ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn every_check_appends_exactly_one_entry() {
        let mut engine =
            PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Allow));
        for i in 0..5 {
            engine
                .check_permission(&format!("tool{i}"), &json!({}), RequestContext::default())
                .await;
        }
        assert_eq!(engine.audit_log().len(), 5);
    }

    #[tokio::test]
    async fn audit_entry_records_tool_args_decision_reason() {
        let mut engine =
            PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Deny));
        engine
            .check_permission("risky", &json!({"x": 1}), RequestContext::default())
            .await;
        let entry = engine.audit_log().last().unwrap();
        assert_eq!(entry.tool_name, "risky");
        assert_eq!(entry.arguments, json!({"x": 1}));
        assert_eq!(entry.decision, "deny");
        assert!(!entry.reason.is_empty());
    }

    // ── Probe tool ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn probe_reports_permission_without_execution() {
        let mut engine =
            PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Deny));
        let result = engine
            .ask_permission(
                &json!({"tool_name": "shell", "arguments": {"command": "ls"}}),
                RequestContext::default(),
            )
            .await;
        assert_eq!(result["allowed"], json!(false));
        assert_eq!(result["tool_name"], json!("shell"));
    }

    #[tokio::test]
    async fn probe_requires_tool_name() {
        let mut engine =
            PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Allow));
        let result = engine.ask_permission(&json!({}), RequestContext::default()).await;
        assert!(result.get("error").is_some());
    }

    // ── Auto-approved merge ───────────────────────────────────────────────────

    #[tokio::test]
    async fn auto_approved_tools_bypass_channel() {
        let mut engine = asking_engine(StubChannel::respond_with(ChannelDecision::Deny));
        engine.add_whitelist_tools(vec!["progress".to_string()]);
        let (allowed, _) =
            engine.check_permission("progress", &json!({}), RequestContext::default()).await;
        assert!(allowed);
    }
}
