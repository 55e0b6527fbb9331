// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use freja_config::SessionConfig;
use freja_gc::{GcConfig, GcResult, GcStrategy, TriggerReason, UsageSnapshot};
use freja_model::{
    context_limit_or, Message, ModelProvider, Part, ToolCallRequest, ToolResult,
    DEFAULT_CONTEXT_LIMIT,
};
use freja_permission::{PermissionEngine, RequestContext, ASK_PERMISSION_TOOL};
use freja_plugins::{AgentType, PluginRegistry, RuntimeView, UserCommand};
use freja_session::{
    generate_session_id, ConnectionInfo, SessionInfo, SessionState, SessionStore, TurnUsage,
};

use crate::{parse_command_args, strip_at_references, TokenLedger};

/// Signals a running [`Runtime::send`] to stop at its next suspension
/// point.  Cloneable; the host keeps one handle while `send` is in flight.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One executed tool call, recorded for post-mortem inspection.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
    pub ok: bool,
    /// Compact rendering of the result payload.
    pub summary: String,
}

struct GcEntry {
    strategy: Box<dyn GcStrategy>,
    config: GcConfig,
}

struct SessionEntry {
    store: Box<dyn SessionStore>,
    config: SessionConfig,
    current_id: Option<String>,
}

/// The tool-call driver: owns the provider, the plugin registry, the
/// permission engine, the GC strategy, and the session store, and runs the
/// model ⇄ tools loop until the model produces a pure-text response.
///
/// A `Runtime` is a plain value; nothing global survives it.  It is not
/// reentrant: `send` takes `&mut self`, so a second call cannot start
/// while one is in flight.
pub struct Runtime {
    provider: Box<dyn ModelProvider>,
    registry: PluginRegistry,
    permissions: Option<PermissionEngine>,
    gc: Option<GcEntry>,
    gc_history: Vec<GcResult>,
    session: Option<SessionEntry>,
    turn_accounting: Vec<TurnUsage>,
    tool_log: Vec<ToolInvocation>,
    ledger: TokenLedger,
    default_context_limit: usize,
    agent_type: AgentType,
    cancel: CancelHandle,
}

impl Runtime {
    pub fn new(provider: Box<dyn ModelProvider>, registry: PluginRegistry) -> Self {
        Self {
            provider,
            registry,
            permissions: None,
            gc: None,
            gc_history: Vec::new(),
            session: None,
            turn_accounting: Vec::new(),
            tool_log: Vec::new(),
            ledger: TokenLedger::new(),
            default_context_limit: DEFAULT_CONTEXT_LIMIT,
            agent_type: AgentType::Main,
            cancel: CancelHandle::default(),
        }
    }

    // ── Configuration ────────────────────────────────────────────────────────

    /// Install the permission engine.  Plugin auto-approved tool names are
    /// merged into its whitelist here, so exposure order matters only up to
    /// this call.
    pub fn set_permission_engine(&mut self, mut engine: PermissionEngine) {
        engine.add_whitelist_tools(self.registry.auto_approved_names());
        self.permissions = Some(engine);
    }

    pub fn set_gc_strategy(&mut self, strategy: Box<dyn GcStrategy>, config: GcConfig) {
        self.gc = Some(GcEntry { strategy, config });
    }

    pub fn remove_gc_strategy(&mut self) {
        self.gc = None;
    }

    /// Install the session store.  When the config enables auto-resume and
    /// the store returns a previous session, its history and accounting are
    /// restored immediately.
    pub async fn set_session_store(&mut self, store: Box<dyn SessionStore>, config: SessionConfig) {
        let resumed = store.on_session_start(&config).await;
        self.session = Some(SessionEntry { store, config, current_id: None });
        if let Some(state) = resumed {
            debug!(session = %state.session_id, "auto-resuming previous session");
            self.provider.reset(Some(state.history.clone()));
            self.turn_accounting = state.turn_accounting.clone();
            if let Some(entry) = self.session.as_mut() {
                entry.current_id = Some(state.session_id);
            }
        }
    }

    /// Fallback context limit for models absent from the catalog.
    pub fn set_default_context_limit(&mut self, limit: usize) {
        self.default_context_limit = limit;
    }

    /// Mark this runtime as driving a subagent (affects permission-request
    /// context only).
    pub fn set_agent_type(&mut self, agent_type: AgentType) {
        self.agent_type = agent_type;
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn clear_cancellation(&mut self) {
        self.cancel = CancelHandle::default();
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn permissions(&self) -> Option<&PermissionEngine> {
        self.permissions.as_ref()
    }

    pub fn permissions_mut(&mut self) -> Option<&mut PermissionEngine> {
        self.permissions.as_mut()
    }

    pub fn history(&self) -> Vec<Message> {
        self.provider.history()
    }

    /// Token usage per completed turn, one entry per `send` call.
    pub fn turn_accounting(&self) -> &[TurnUsage] {
        &self.turn_accounting
    }

    /// Executed tool calls, in execution order.
    pub fn tool_log(&self) -> &[ToolInvocation] {
        &self.tool_log
    }

    /// The accounting ledger: one event per model response, tool
    /// invocation, permission consult, and collection.
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut TokenLedger {
        &mut self.ledger
    }

    pub fn gc_history(&self) -> &[GcResult] {
        &self.gc_history
    }

    /// Tool declarations composed from the exposed plugins; the provider
    /// adapter forwards these with each request.
    pub fn active_tool_schemas(&self) -> Vec<freja_model::ToolSchema> {
        self.registry.active_tool_schemas()
    }

    /// System instructions composed from the exposed plugins; the provider
    /// adapter installs this at chat creation.
    pub fn composed_system_instructions(&self) -> Option<String> {
        self.registry.composed_system_instructions()
    }

    /// User commands available from the exposed plugins.
    pub fn user_commands(&self) -> Vec<UserCommand> {
        self.registry.user_commands()
    }

    /// Context-window usage from the catalog limit plus accumulated
    /// per-turn counters.
    pub fn context_usage(&self) -> UsageSnapshot {
        let prompt: usize = self.turn_accounting.iter().map(|t| t.prompt).sum();
        let output: usize = self.turn_accounting.iter().map(|t| t.output).sum();
        let total: usize = self.turn_accounting.iter().map(|t| t.total).sum();
        let limit = context_limit_or(self.provider.model_name(), self.default_context_limit);
        UsageSnapshot {
            model: self.provider.model_name().to_string(),
            context_limit: limit,
            total_tokens: total,
            prompt_tokens: prompt,
            output_tokens: output,
            turns: self.turn_accounting.len(),
            percent_used: if limit > 0 { total as f64 / limit as f64 * 100.0 } else { 0.0 },
            tokens_remaining: limit.saturating_sub(total),
        }
    }

    fn runtime_view(&self) -> RuntimeView {
        RuntimeView {
            model_name: self.provider.model_name().to_string(),
            context_limit: context_limit_or(
                self.provider.model_name(),
                self.default_context_limit,
            ),
            agent_type: self.agent_type,
        }
    }

    // ── The driver loop ──────────────────────────────────────────────────────

    /// Submit a user message and drive the model ⇄ tools loop to a terminal
    /// text response.
    ///
    /// The prompt runs through the enrichment pipeline first, then through
    /// the final `@`-reference strip.  Tool calls execute strictly in the
    /// order the model emitted them; their responses return to the model in
    /// the same order as one user-role continuation.
    pub async fn send(&mut self, text: &str) -> anyhow::Result<String> {
        if let Some(result) = self.maybe_collect_before_send().await {
            debug!(
                strategy = %result.strategy,
                collected = result.items_collected,
                "context collected before dispatch"
            );
        }

        let view = self.runtime_view();
        let enriched = self.registry.enrich_prompt(text, &view);
        let processed = strip_at_references(&enriched.prompt);

        self.drive(vec![Part::text(processed)]).await
    }

    /// Like [`send`](Self::send), but the caller supplies the message parts
    /// (e.g. text plus inline images).  The enrichment pipeline is skipped;
    /// parts are submitted as-is.
    pub async fn send_with_parts(&mut self, parts: Vec<Part>) -> anyhow::Result<String> {
        if self.maybe_collect_before_send().await.is_some() {
            debug!("context collected before dispatch");
        }
        self.drive(parts).await
    }

    async fn drive(&mut self, parts: Vec<Part>) -> anyhow::Result<String> {
        let mut turn = TurnUsage::default();
        let mut partial_text = String::new();
        let mut pending = parts;

        loop {
            // Suspension point (a): the model request.
            if self.cancel.is_cancelled() {
                return Ok(partial_text);
            }

            let response = match self.provider.send_message(pending).await {
                Ok(r) => r,
                Err(e) => {
                    // The turn's partial accounting is still recorded.
                    if turn.total > 0 {
                        self.turn_accounting.push(turn);
                    }
                    return Err(e).context("model request failed");
                }
            };

            turn.prompt += response.usage.prompt_tokens as usize;
            turn.output += response.usage.output_tokens as usize;
            turn.total += response.usage.total_tokens as usize;
            self.ledger.record(
                "response",
                serde_json::json!({
                    "prompt_tokens": response.usage.prompt_tokens,
                    "output_tokens": response.usage.output_tokens,
                    "total_tokens": response.usage.total_tokens,
                    "tool_calls": response.tool_calls.len(),
                }),
            );

            if !response.text.is_empty() {
                partial_text = response.text.clone();
            }

            if response.tool_calls.is_empty() {
                self.turn_accounting.push(turn);
                self.notify_turn_complete().await;
                return Ok(response.text);
            }

            let mut responses: Vec<Part> = Vec::new();
            for call in &response.tool_calls {
                // Suspension point (b): permission resolution may block on
                // the approval channel.
                if self.cancel.is_cancelled() {
                    return Ok(partial_text);
                }
                responses.extend(self.dispatch_tool(call).await);
            }
            pending = responses;
        }
    }

    /// Execute one tool call and build its response part(s).
    ///
    /// Tools never raise into the driver: denials, missing executors, and
    /// execution failures all become `{"error": …}` payloads the model can
    /// react to.
    async fn dispatch_tool(&mut self, call: &ToolCallRequest) -> Vec<Part> {
        // The permission probe is always allowed and never checked against
        // itself.
        if call.name == ASK_PERMISSION_TOOL {
            if let Some(engine) = self.permissions.as_mut() {
                let context =
                    RequestContext { agent_type: self.agent_type, ..Default::default() };
                let payload = engine.ask_permission(&call.args, context).await;
                self.record_tool(call, true, &payload);
                return vec![Part::tool_response(&call.name, payload)];
            }
        }

        if !self.registry.has_executor(&call.name) {
            let payload =
                serde_json::json!({ "error": format!("no executor registered for {}", call.name) });
            self.record_tool(call, false, &payload);
            return vec![Part::tool_response(&call.name, payload)];
        }

        if let Some(engine) = self.permissions.as_mut() {
            let context = RequestContext {
                agent_type: self.agent_type,
                agent_name: None,
                intent: None,
                display_info: self.registry.format_permission_request(&call.name, &call.args),
            };
            let (allowed, reason) =
                engine.check_permission(&call.name, &call.args, context).await;
            self.ledger.record(
                "permission-check",
                serde_json::json!({ "tool": &call.name, "allowed": allowed, "reason": &reason }),
            );
            if !allowed {
                let payload =
                    serde_json::json!({ "error": format!("Permission denied: {reason}") });
                self.record_tool(call, false, &payload);
                return vec![Part::tool_response(&call.name, payload)];
            }
        }

        match self.registry.execute(&call.name, &call.args).await {
            ToolResult::Multimodal { mime_type, data, descriptor } => {
                let display_name = descriptor
                    .get("display_name")
                    .and_then(Value::as_str)
                    .unwrap_or("attachment")
                    .to_string();
                let mut payload = descriptor;
                payload.insert("status".into(), Value::String("success".into()));
                payload.insert(
                    "attachment".into(),
                    serde_json::json!({ "$ref": display_name }),
                );
                let payload = Value::Object(payload);
                self.record_tool(call, true, &payload);
                vec![
                    Part::tool_response(&call.name, payload),
                    Part::inline_blob(mime_type, data),
                ]
            }
            result => {
                let ok = !result.is_error();
                let payload = result.into_payload();
                self.record_tool(call, ok, &payload);
                vec![Part::tool_response(&call.name, payload)]
            }
        }
    }

    fn record_tool(&mut self, call: &ToolCallRequest, ok: bool, payload: &Value) {
        self.ledger
            .record("tool-call", serde_json::json!({ "tool": &call.name, "ok": ok }));
        self.tool_log.push(ToolInvocation {
            name: call.name.clone(),
            args: call.args.clone(),
            ok,
            summary: summarize_payload(payload),
        });
    }

    // ── Context garbage collection ───────────────────────────────────────────

    async fn maybe_collect_before_send(&mut self) -> Option<GcResult> {
        let usage = self.context_usage();
        let entry = self.gc.as_ref()?;
        if !entry.config.check_before_send {
            return None;
        }
        let reason = entry.strategy.should_collect(&usage, &entry.config)?;
        Some(self.run_collection(reason).await)
    }

    /// Force a collection regardless of current usage.
    pub async fn manual_gc(&mut self) -> anyhow::Result<GcResult> {
        if self.gc.is_none() {
            anyhow::bail!("no GC strategy configured");
        }
        Ok(self.run_collection(TriggerReason::Manual).await)
    }

    async fn run_collection(&mut self, reason: TriggerReason) -> GcResult {
        let usage = self.context_usage();
        let history = self.provider.history();
        let entry = self.gc.as_ref().expect("collection runs only when configured");
        let (new_history, result) =
            entry.strategy.collect(history, &usage, &entry.config, reason).await;

        self.ledger.record(
            "gc",
            serde_json::json!({
                "strategy": &result.strategy,
                "success": result.success,
                "items_collected": result.items_collected,
                "trigger": result.trigger_reason.as_str(),
            }),
        );
        if result.success {
            // Install the reshaped history atomically; accounting stats are
            // deliberately left intact.
            self.provider.reset(Some(new_history));
            self.gc_history.push(result.clone());
        } else {
            warn!(
                strategy = %result.strategy,
                error = result.error.as_deref().unwrap_or("unknown"),
                "context collection failed; history unchanged"
            );
        }
        result
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    fn snapshot_state(&self, session_id: Option<&str>) -> SessionState {
        let id = session_id
            .map(str::to_string)
            .or_else(|| self.session.as_ref().and_then(|s| s.current_id.clone()))
            .unwrap_or_else(generate_session_id);
        let now = Utc::now();
        SessionState {
            session_id: id,
            history: self.provider.history(),
            created_at: now,
            updated_at: now,
            turn_count: self.turn_accounting.len(),
            turn_accounting: self.turn_accounting.clone(),
            connection: ConnectionInfo {
                provider: Some(self.provider.name().to_string()),
                region: None,
                model: Some(self.provider.model_name().to_string()),
            },
        }
    }

    async fn notify_turn_complete(&self) {
        let Some(entry) = &self.session else {
            return;
        };
        let state = self.snapshot_state(None);
        entry.store.on_turn_complete(&state, &entry.config).await;
    }

    /// Save the current session; generates an id when none is supplied or
    /// remembered.  Returns the id saved under.
    pub async fn save_session(&mut self, session_id: Option<&str>) -> anyhow::Result<String> {
        let state = self.snapshot_state(session_id);
        let entry =
            self.session.as_mut().ok_or_else(|| anyhow::anyhow!("no session store configured"))?;
        entry.store.save(&state).await?;
        entry.current_id = Some(state.session_id.clone());
        Ok(state.session_id)
    }

    /// Load a saved session and install its history and accounting.
    pub async fn resume_session(&mut self, session_id: &str) -> anyhow::Result<SessionState> {
        let entry =
            self.session.as_ref().ok_or_else(|| anyhow::anyhow!("no session store configured"))?;
        let state = entry.store.load(session_id).await?;
        self.provider.reset(Some(state.history.clone()));
        self.turn_accounting = state.turn_accounting.clone();
        if let Some(entry) = self.session.as_mut() {
            entry.current_id = Some(state.session_id.clone());
        }
        Ok(state)
    }

    pub async fn list_sessions(&self) -> anyhow::Result<Vec<SessionInfo>> {
        let entry =
            self.session.as_ref().ok_or_else(|| anyhow::anyhow!("no session store configured"))?;
        Ok(entry.store.list_sessions().await?)
    }

    pub async fn delete_session(&mut self, session_id: &str) -> anyhow::Result<bool> {
        let entry =
            self.session.as_ref().ok_or_else(|| anyhow::anyhow!("no session store configured"))?;
        Ok(entry.store.delete(session_id).await?)
    }

    /// Graceful shutdown: fires the session-end hook (final save when
    /// configured), releases the approval channel, and unexposes plugins.
    pub async fn shutdown(&mut self) {
        if let Some(entry) = &self.session {
            let state = self.snapshot_state(None);
            entry.store.on_session_end(&state, &entry.config).await;
        }
        if let Some(engine) = &self.permissions {
            engine.shutdown();
        }
        self.registry.unexpose_all();
    }

    // ── User commands ────────────────────────────────────────────────────────

    /// Execute a plugin-provided user command outside the model path.
    ///
    /// Permission checks are bypassed: the user invoked this directly.  When
    /// the command declares `share_with_model`, the invocation and its
    /// payload are injected into history so subsequent model turns see them.
    /// Returns `(payload, shared_with_model)`.
    pub async fn execute_user_command(
        &mut self,
        name: &str,
        raw_args: &str,
    ) -> anyhow::Result<(Value, bool)> {
        let command = self
            .registry
            .find_command(name)
            .ok_or_else(|| anyhow::anyhow!("unknown user command: {name}"))?;
        let args = parse_command_args(&command, raw_args);
        let payload = self.registry.execute(name, &args).await.into_payload();

        if command.share_with_model {
            let mut history = self.provider.history();
            history.push(Message::user(format!("[User executed command: {name}]")));
            history
                .push(Message::model_parts(vec![Part::tool_response(name, payload.clone())]));
            self.provider.reset(Some(history));
        }

        Ok((payload, command.share_with_model))
    }
}

/// Compact single-line rendering of a result payload for the tool log.
fn summarize_payload(payload: &Value) -> String {
    let text = payload.to_string();
    match text.char_indices().nth(200) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text,
    }
}
