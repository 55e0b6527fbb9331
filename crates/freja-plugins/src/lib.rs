// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod capability;
mod plugin;
mod registry;

pub use capability::{Capability, CapabilitySet};
pub use plugin::{
    model_matches_requirements, AgentType, CommandCompletion, CommandParameter, DisplayFormat,
    EnrichmentResult, PermissionDisplayInfo, PluginKind, RuntimeView, ToolPlugin, UserCommand,
};
pub use registry::{PluginRegistry, RegistryError};
