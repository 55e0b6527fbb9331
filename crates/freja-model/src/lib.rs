// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod catalog;
mod mock;
mod provider;
mod types;

pub use catalog::{context_limit, context_limit_or, DEFAULT_CONTEXT_LIMIT};
pub use mock::{EchoProvider, ScriptedProvider};
pub use provider::ModelProvider;
pub use types::{
    estimate_history_tokens, Message, ModelResponse, Part, Role, ToolCallRequest, ToolResult,
    ToolSchema, Usage,
};
