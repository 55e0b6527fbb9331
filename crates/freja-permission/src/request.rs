// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use freja_plugins::{AgentType, PermissionDisplayInfo};

use crate::CLI_TOOL_NAME;

/// What a timed-out approval resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutDefault {
    Allow,
    #[default]
    Deny,
}

/// Context attached to a permission request for the channel's benefit.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub agent_type: AgentType,
    pub agent_name: Option<String>,
    /// Why the agent wants to run this tool, if known.
    pub intent: Option<String>,
    /// Custom rendering supplied by the owning plugin.
    pub display_info: Option<PermissionDisplayInfo>,
}

/// Request sent to an approval channel.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub request_id: String,
    /// ISO-8601 UTC creation time.
    pub timestamp: String,
    pub tool_name: String,
    pub arguments: Value,
    pub timeout_seconds: u64,
    pub default_on_timeout: TimeoutDefault,
    pub context: RequestContext,
}

impl PermissionRequest {
    /// Create a request with a fresh id and timestamp.
    pub fn create(
        tool_name: impl Into<String>,
        arguments: Value,
        timeout_seconds: u64,
        context: RequestContext,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            tool_name: tool_name.into(),
            arguments,
            timeout_seconds,
            default_on_timeout: TimeoutDefault::Deny,
            context,
        }
    }

    /// Wire representation shared by the webhook and file channels.
    pub fn to_wire(&self) -> Value {
        let mut context = serde_json::Map::new();
        context.insert(
            "agent_type".into(),
            json!(match self.context.agent_type {
                AgentType::Main => "main",
                AgentType::Subagent => "subagent",
            }),
        );
        if let Some(name) = &self.context.agent_name {
            context.insert("agent_name".into(), json!(name));
        }
        if let Some(intent) = &self.context.intent {
            context.insert("intent".into(), json!(intent));
        }
        json!({
            "request_id": self.request_id,
            "timestamp": self.timestamp,
            "tool_name": self.tool_name,
            "arguments": self.arguments,
            "timeout_seconds": self.timeout_seconds,
            "default_on_timeout": match self.default_on_timeout {
                TimeoutDefault::Allow => "allow",
                TimeoutDefault::Deny => "deny",
            },
            "context": context,
        })
    }

    /// The response a channel produces when no decision arrives in time.
    pub fn timeout_response(&self) -> ChannelResponse {
        match self.default_on_timeout {
            TimeoutDefault::Allow => ChannelResponse::new(
                &self.request_id,
                ChannelDecision::Allow,
                format!("Timeout after {}s - default allow", self.timeout_seconds),
            ),
            TimeoutDefault::Deny => ChannelResponse::new(
                &self.request_id,
                ChannelDecision::Timeout,
                format!("No response within {}s", self.timeout_seconds),
            ),
        }
    }
}

/// Possible decisions from an approval channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDecision {
    Allow,
    Deny,
    /// Execute this once without remembering anything.
    AllowOnce,
    /// Add the remember-pattern to the session whitelist.
    AllowSession,
    /// Add the remember-pattern to the session blacklist.
    DenySession,
    /// Pre-approve all future requests in this session.
    AllowAll,
    /// The channel did not respond in time.
    Timeout,
}

/// Response from an approval channel.
#[derive(Debug, Clone)]
pub struct ChannelResponse {
    pub request_id: String,
    pub decision: ChannelDecision,
    pub reason: String,
    pub remember: bool,
    /// Glob saved into a session list (e.g. `"git *"`).
    pub remember_pattern: Option<String>,
    /// ISO-8601 expiry for the remembered rule, if any.
    pub expires_at: Option<String>,
}

impl ChannelResponse {
    pub fn new(
        request_id: impl Into<String>,
        decision: ChannelDecision,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            decision,
            reason: reason.into(),
            remember: false,
            remember_pattern: None,
            expires_at: None,
        }
    }

    pub fn deny(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(request_id, ChannelDecision::Deny, reason)
    }

    pub fn remembered(mut self, pattern: impl Into<String>) -> Self {
        self.remember = true;
        self.remember_pattern = Some(pattern.into());
        self
    }

    /// Parse a wire response.  An unknown decision string degrades to deny
    /// rather than failing the approval round-trip.
    pub fn from_wire(value: &Value) -> Self {
        let decision = value
            .get("decision")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_value(json!(s)).ok())
            .unwrap_or(ChannelDecision::Deny);
        Self {
            request_id: value
                .get("request_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            decision,
            reason: value.get("reason").and_then(Value::as_str).unwrap_or_default().to_string(),
            remember: value.get("remember").and_then(Value::as_bool).unwrap_or(false),
            remember_pattern: value
                .get("remember_pattern")
                .and_then(Value::as_str)
                .map(str::to_string),
            expires_at: value.get("expires_at").and_then(Value::as_str).map(str::to_string),
        }
    }

    pub fn to_wire(&self) -> Value {
        json!({
            "request_id": self.request_id,
            "decision": serde_json::to_value(self.decision).expect("decision serializes"),
            "reason": self.reason,
            "remember": self.remember,
            "remember_pattern": self.remember_pattern,
            "expires_at": self.expires_at,
        })
    }
}

/// Build the glob remembered by an `always` / `never` decision.
///
/// For the canonical CLI tool this is `"<command-head> *"` so the whole
/// command family is covered; for any other tool it is the bare tool name.
pub fn synthesize_remember_pattern(request: &PermissionRequest) -> String {
    if request.tool_name == CLI_TOOL_NAME {
        let head = request
            .arguments
            .get("command")
            .and_then(Value::as_str)
            .and_then(|c| c.split_whitespace().next())
            .unwrap_or("");
        if !head.is_empty() {
            return format!("{head} *");
        }
    }
    request.tool_name.clone()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
