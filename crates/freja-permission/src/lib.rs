// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod channels;
mod engine;
mod policy;
mod request;

pub use channels::{
    create_channel, Channel, ConsoleChannel, FileChannel, OutputCallback, OutputMode,
    QueueChannel, WebhookChannel,
};
pub use engine::{AuditEntry, PermissionEngine, ASK_PERMISSION_TOOL};
pub use policy::{
    PermissionDecision, PermissionPolicy, PolicyMatch, RuleType, CLI_TOOL_NAME,
};
pub use request::{
    synthesize_remember_pattern, ChannelDecision, ChannelResponse, PermissionRequest,
    RequestContext, TimeoutDefault,
};
