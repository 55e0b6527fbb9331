// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod console;
mod file;
mod queue;
mod webhook;

use async_trait::async_trait;

use freja_config::{ChannelConfig, ChannelType};
use freja_plugins::{AgentType, PermissionDisplayInfo};

use crate::{
    synthesize_remember_pattern, ChannelDecision, ChannelResponse, PermissionRequest,
};

pub use console::ConsoleChannel;
pub use file::FileChannel;
pub use queue::{OutputCallback, OutputMode, QueueChannel};
pub use webhook::WebhookChannel;

/// Out-of-band decision source for ambiguous permissions.
///
/// Channels resolve the requests static policy rules cannot decide.  All
/// implementations produce the same [`ChannelResponse`] shape; the policy
/// engine is agnostic to which one is configured.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique identifier for this channel type.
    fn name(&self) -> &str;

    /// Resolve one permission request.
    async fn request_permission(&self, request: &PermissionRequest) -> ChannelResponse;

    /// Release any resources (best-effort).
    fn shutdown(&self) {}
}

/// Build a channel from configuration.
///
/// The queue channel cannot be built from file config alone (it needs a
/// live output callback and mailbox) and must be constructed directly via
/// [`QueueChannel::new`].
pub fn create_channel(config: &ChannelConfig) -> anyhow::Result<Box<dyn Channel>> {
    match config.channel_type {
        ChannelType::Console => Ok(Box::new(ConsoleChannel::new())),
        ChannelType::Webhook => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("webhook channel requires an endpoint"))?;
            Ok(Box::new(WebhookChannel::new(endpoint)?))
        }
        ChannelType::File => {
            let base = config
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("file channel requires a base path endpoint"))?;
            Ok(Box::new(FileChannel::new(base)?))
        }
        ChannelType::Queue => anyhow::bail!(
            "queue channel requires an output callback and input mailbox; construct it directly"
        ),
    }
}

// ─── Shared rendering / parsing helpers ──────────────────────────────────────

pub(crate) const OPTIONS_LINE: &str = "Options: [y]es, [n]o, [a]lways, [never], [once], [all]";

/// Render a permission request as the fixed plain-text prompt block used by
/// the interactive channels.
pub(crate) fn render_request(request: &PermissionRequest) -> String {
    let mut lines = Vec::new();
    lines.push("=".repeat(60));

    let requester = match (&request.context.agent_type, &request.context.agent_name) {
        (AgentType::Subagent, Some(name)) => {
            format!("[askPermission] Subagent '{name}' requesting tool execution:")
        }
        (AgentType::Subagent, None) => {
            "[askPermission] Subagent requesting tool execution:".to_string()
        }
        (AgentType::Main, _) => "[askPermission] Main agent requesting tool execution:".to_string(),
    };
    lines.push(requester);

    if let Some(intent) = &request.context.intent {
        lines.push(format!("  Intent: {intent}"));
    }

    match &request.context.display_info {
        Some(info) => lines.push(render_display_info(info)),
        None => {
            lines.push(format!("  Tool: {}", request.tool_name));
            let args = serde_json::to_string_pretty(&request.arguments)
                .unwrap_or_else(|_| request.arguments.to_string());
            lines.push(format!("  Arguments: {args}"));
        }
    }

    lines.push("=".repeat(60));
    lines.join("\n")
}

/// Render plugin-supplied display info: summary, details, truncation note.
pub(crate) fn render_display_info(info: &PermissionDisplayInfo) -> String {
    let mut lines = vec![format!("  {}", info.summary), String::new()];
    lines.push(info.details.clone());
    if info.truncated {
        lines.push(String::new());
        match info.original_lines {
            Some(n) => lines
                .push(format!("  [Truncated: showing partial content, {n} lines total]")),
            None => lines.push("  [Truncated: content was too large to display in full]".into()),
        }
    }
    lines.join("\n")
}

/// Map one line of user input to a channel response.  Unknown input denies.
pub(crate) fn response_for_token(input: &str, request: &PermissionRequest) -> ChannelResponse {
    let id = &request.request_id;
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => ChannelResponse::new(id, ChannelDecision::Allow, "User approved"),
        "n" | "no" => ChannelResponse::new(id, ChannelDecision::Deny, "User denied"),
        "a" | "always" => {
            ChannelResponse::new(id, ChannelDecision::AllowSession, "User approved for session")
                .remembered(synthesize_remember_pattern(request))
        }
        "never" => {
            ChannelResponse::new(id, ChannelDecision::DenySession, "User denied for session")
                .remembered(synthesize_remember_pattern(request))
        }
        "once" => ChannelResponse::new(id, ChannelDecision::AllowOnce, "User approved once"),
        "all" => ChannelResponse::new(
            id,
            ChannelDecision::AllowAll,
            "User pre-approved all future requests",
        ),
        other => ChannelResponse::deny(id, format!("Unknown response: {other}")),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
