// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use freja_model::{ToolResult, ToolSchema};

use crate::{
    model_matches_requirements, Capability, CommandCompletion, EnrichmentResult,
    PermissionDisplayInfo, PluginKind, RuntimeView, ToolPlugin, UserCommand,
};

/// Factory yielding a fresh plugin instance.  Registration is the discovery
/// step: nothing beyond name and kind is touched until exposure.
pub type PluginFactory = Box<dyn Fn() -> Box<dyn ToolPlugin> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin '{name}' not found. Available: {available:?}")]
    UnknownPlugin { name: String, available: Vec<String> },

    #[error("executor '{executor}' from plugin '{plugin}' is already provided by '{existing}'")]
    DuplicateExecutor { executor: String, plugin: String, existing: String },

    #[error("plugin '{plugin}' does not support model '{model}'")]
    ModelMismatch { plugin: String, model: String },

    #[error("initializing plugin '{plugin}': {source}")]
    Initialize {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Manages plugin discovery, lifecycle, and exposure state.
///
/// Exposure order is explicit and is the only ordering rule for composed
/// system instructions and the enrichment pipeline.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, (PluginKind, PluginFactory)>,
    exposed: HashMap<String, Box<dyn ToolPlugin>>,
    /// Exposure order; drives every compositional query.
    order: Vec<String>,
    configs: HashMap<String, Option<Value>>,
    /// Executor name → owning plugin name.  Uniqueness enforced at expose.
    executors: HashMap<String, String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin factory under `name`.  Replaces any previous
    /// factory with the same name.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        kind: PluginKind,
        factory: PluginFactory,
    ) {
        self.factories.insert(name.into(), (kind, factory));
    }

    /// All discovered plugin names.
    pub fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Kind of a discovered plugin, without instantiating it.
    pub fn kind_of(&self, name: &str) -> Option<PluginKind> {
        self.factories.get(name).map(|(kind, _)| *kind)
    }

    /// Currently exposed plugin names, in exposure order.
    pub fn list_exposed(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_exposed(&self, name: &str) -> bool {
        self.exposed.contains_key(name)
    }

    /// Expose a plugin, initializing it with `config`.
    ///
    /// Re-exposing with a different config shuts the instance down and
    /// re-initializes it in place; re-exposing with the same config is a
    /// no-op.  An initialization failure leaves the plugin unexposed.
    pub fn expose(&mut self, name: &str, config: Option<Value>) -> Result<(), RegistryError> {
        self.expose_inner(name, config, None)
    }

    /// Like [`expose`](Self::expose), but refuses plugins whose
    /// model-requirement patterns do not match `model_name`.
    pub fn expose_for_model(
        &mut self,
        name: &str,
        config: Option<Value>,
        model_name: &str,
    ) -> Result<(), RegistryError> {
        self.expose_inner(name, config, Some(model_name))
    }

    fn expose_inner(
        &mut self,
        name: &str,
        config: Option<Value>,
        model_name: Option<&str>,
    ) -> Result<(), RegistryError> {
        if let Some(plugin) = self.exposed.get_mut(name) {
            // Re-exposure: reinitialize only when the config changed.
            if self.configs.get(name) != Some(&config) {
                if let Err(e) = plugin.shutdown() {
                    warn!(plugin = name, error = %e, "shutdown failed during re-expose");
                }
                plugin.initialize(config.as_ref()).map_err(|source| {
                    RegistryError::Initialize { plugin: name.to_string(), source }
                })?;
                self.configs.insert(name.to_string(), config);
            }
            return Ok(());
        }

        let Some((_, factory)) = self.factories.get(name) else {
            return Err(RegistryError::UnknownPlugin {
                name: name.to_string(),
                available: self.list_available(),
            });
        };

        let mut plugin = factory();

        if let Some(model) = model_name {
            if let Some(patterns) = plugin.model_requirements() {
                if !model_matches_requirements(model, &patterns) {
                    return Err(RegistryError::ModelMismatch {
                        plugin: name.to_string(),
                        model: model.to_string(),
                    });
                }
            }
        }

        plugin
            .initialize(config.as_ref())
            .map_err(|source| RegistryError::Initialize { plugin: name.to_string(), source })?;

        // Executor names must be unique across the exposed set; a clash is a
        // configuration error and the new plugin stays unexposed.
        let names = plugin.executor_names();
        for executor in &names {
            if let Some(existing) = self.executors.get(executor) {
                if let Err(e) = plugin.shutdown() {
                    warn!(plugin = name, error = %e, "shutdown failed after rejected expose");
                }
                return Err(RegistryError::DuplicateExecutor {
                    executor: executor.clone(),
                    plugin: name.to_string(),
                    existing: existing.clone(),
                });
            }
        }
        for executor in names {
            self.executors.insert(executor, name.to_string());
        }

        self.exposed.insert(name.to_string(), plugin);
        self.order.push(name.to_string());
        self.configs.insert(name.to_string(), config);
        Ok(())
    }

    /// Unexpose a plugin.  Shutdown is best-effort: an error is logged and
    /// the plugin is dropped regardless.
    pub fn unexpose(&mut self, name: &str) {
        if let Some(mut plugin) = self.exposed.remove(name) {
            if let Err(e) = plugin.shutdown() {
                warn!(plugin = name, error = %e, "plugin shutdown failed");
            }
            self.order.retain(|n| n != name);
            self.configs.remove(name);
            self.executors.retain(|_, owner| owner != name);
        }
    }

    pub fn unexpose_all(&mut self) {
        for name in self.order.clone() {
            self.unexpose(&name);
        }
    }

    // ── Compositional queries ────────────────────────────────────────────────

    fn each_exposed(&self) -> impl Iterator<Item = &dyn ToolPlugin> {
        self.order.iter().filter_map(|n| self.exposed.get(n).map(|p| p.as_ref()))
    }

    /// Tool schemas of all exposed plugins, in exposure order.  A plugin
    /// that fails the query is logged and skipped; it stays exposed.
    pub fn active_tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = Vec::new();
        for plugin in self.each_exposed() {
            if !plugin.capabilities().contains(Capability::Tools) {
                continue;
            }
            match plugin.tool_schemas() {
                Ok(mut s) => schemas.append(&mut s),
                Err(e) => warn!(plugin = plugin.name(), error = %e, "tool_schemas query failed"),
            }
        }
        schemas
    }

    /// True when some exposed plugin executes `name`.
    pub fn has_executor(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Dispatch a tool call to the owning plugin.  Unknown names become an
    /// error value, never a panic.
    pub async fn execute(&self, name: &str, args: &Value) -> ToolResult {
        let Some(owner) = self.executors.get(name).and_then(|n| self.exposed.get(n)) else {
            return ToolResult::err(format!("no executor registered for {name}"));
        };
        owner.execute(name, args).await
    }

    /// System instructions of all exposed plugins, joined with a blank line,
    /// in exposure order.  `None` when no plugin contributes.
    pub fn composed_system_instructions(&self) -> Option<String> {
        let mut parts = Vec::new();
        for plugin in self.each_exposed() {
            if !plugin.capabilities().contains(Capability::SystemInstructions) {
                continue;
            }
            match plugin.system_instructions() {
                Ok(Some(text)) => parts.push(text),
                Ok(None) => {}
                Err(e) => {
                    warn!(plugin = plugin.name(), error = %e, "system_instructions query failed")
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Run the prompt through every enrichment subscriber in exposure order.
    ///
    /// Metadata is namespaced per plugin.  A failing enricher is logged and
    /// skipped; the prompt continues through the rest of the pipeline.
    pub fn enrich_prompt(&self, prompt: &str, view: &RuntimeView) -> EnrichmentResult {
        let mut current = prompt.to_string();
        let mut metadata = serde_json::Map::new();
        for plugin in self.each_exposed() {
            if !plugin.capabilities().contains(Capability::Enrichment) {
                continue;
            }
            match plugin.enrich_prompt(&current, view) {
                Ok(result) => {
                    current = result.prompt;
                    if !result.metadata.is_empty() {
                        metadata
                            .insert(plugin.name().to_string(), Value::Object(result.metadata));
                    }
                }
                Err(e) => warn!(plugin = plugin.name(), error = %e, "prompt enrichment failed"),
            }
        }
        EnrichmentResult { prompt: current, metadata }
    }

    /// Union of auto-approved tool names across exposed plugins.
    pub fn auto_approved_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for plugin in self.each_exposed() {
            if !plugin.capabilities().contains(Capability::AutoApproved) {
                continue;
            }
            match plugin.auto_approved_tools() {
                Ok(tools) => {
                    for t in tools {
                        if !names.contains(&t) {
                            names.push(t);
                        }
                    }
                }
                Err(e) => {
                    warn!(plugin = plugin.name(), error = %e, "auto_approved_tools query failed")
                }
            }
        }
        names
    }

    /// User commands of all exposed plugins, in exposure order.
    pub fn user_commands(&self) -> Vec<UserCommand> {
        let mut commands = Vec::new();
        for plugin in self.each_exposed() {
            if !plugin.capabilities().contains(Capability::UserCommands) {
                continue;
            }
            match plugin.user_commands() {
                Ok(mut c) => commands.append(&mut c),
                Err(e) => warn!(plugin = plugin.name(), error = %e, "user_commands query failed"),
            }
        }
        commands
    }

    /// Resolve a user command by name in the union of exposed commands.
    pub fn find_command(&self, name: &str) -> Option<UserCommand> {
        self.user_commands().into_iter().find(|c| c.name == name)
    }

    /// Completion options for a user command, from the plugin that owns it.
    pub fn command_completions(&self, command: &str, args: &[String]) -> Vec<CommandCompletion> {
        for plugin in self.each_exposed() {
            if !plugin.capabilities().contains(Capability::Completions) {
                continue;
            }
            let owns = matches!(plugin.user_commands(), Ok(cmds) if cmds.iter().any(|c| c.name == command));
            if owns {
                return plugin.command_completions(command, args);
            }
        }
        Vec::new()
    }

    /// Custom approval-UI rendering for `tool_name`, from its owning plugin.
    pub fn format_permission_request(
        &self,
        tool_name: &str,
        args: &Value,
    ) -> Option<PermissionDisplayInfo> {
        let owner = self.executors.get(tool_name)?;
        let plugin = self.exposed.get(owner)?;
        if !plugin.capabilities().contains(Capability::PermissionDisplay) {
            return None;
        }
        plugin.format_permission_request(tool_name, args)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
