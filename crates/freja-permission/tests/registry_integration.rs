// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Integration between the permission engine and the plugin registry:
//! auto-approved tools, plugin-formatted approval display, and session
//! rules accumulated through channel decisions.

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use freja_config::DefaultPolicy;
use freja_permission::{
    ConsoleChannel, PermissionEngine, PermissionPolicy, RequestContext,
};
use freja_plugins::{
    Capability, CapabilitySet, PermissionDisplayInfo, PluginKind, PluginRegistry, ToolPlugin,
};

/// Writer that exposes everything written for assertions.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn console_with_input(input: &str) -> (ConsoleChannel, SharedBuf) {
    let buf = SharedBuf::default();
    let channel = ConsoleChannel::with_io(
        Box::new(Cursor::new(input.as_bytes().to_vec())),
        Box::new(buf.clone()),
    );
    (channel, buf)
}

/// File-editing style plugin: one tool, custom approval rendering, and a
/// progress tool that never needs approval.
#[derive(Default)]
struct EditorPlugin;

#[async_trait]
impl ToolPlugin for EditorPlugin {
    fn name(&self) -> &str {
        "editor"
    }
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Tools)
            .with(Capability::AutoApproved)
            .with(Capability::PermissionDisplay)
    }
    fn executor_names(&self) -> Vec<String> {
        vec!["edit_file".into(), "report_progress".into()]
    }
    async fn execute(&self, name: &str, _args: &Value) -> freja_model::ToolResult {
        freja_model::ToolResult::ok(json!({ "done": name }))
    }
    fn auto_approved_tools(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["report_progress".into()])
    }
    fn format_permission_request(
        &self,
        _tool_name: &str,
        args: &Value,
    ) -> Option<PermissionDisplayInfo> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or("?");
        Some(PermissionDisplayInfo::text(
            format!("Update file: {path}"),
            "-old line\n+new line",
        ))
    }
}

fn exposed_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register_factory(
        "editor",
        PluginKind::Tool,
        Box::new(|| Box::new(EditorPlugin) as Box<dyn ToolPlugin>),
    );
    registry.expose("editor", None).unwrap();
    registry
}

#[tokio::test]
async fn auto_approved_tools_skip_the_channel() {
    let registry = exposed_registry();
    // A channel that would deny everything it is asked about.
    let (channel, _) = console_with_input("n\n");
    let mut engine = PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Ask))
        .with_channel(Box::new(channel));
    engine.add_whitelist_tools(registry.auto_approved_names());

    let (allowed, reason) = engine
        .check_permission("report_progress", &json!({}), RequestContext::default())
        .await;
    assert!(allowed, "auto-approved tool must not prompt: {reason}");

    // The non-approved tool still goes to the channel and gets denied.
    let (allowed, _) = engine
        .check_permission("edit_file", &json!({"path": "a.rs"}), RequestContext::default())
        .await;
    assert!(!allowed);
}

#[tokio::test]
async fn plugin_display_info_reaches_the_prompt() {
    let registry = exposed_registry();
    let (channel, buf) = console_with_input("y\n");
    let mut engine = PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Ask))
        .with_channel(Box::new(channel));

    let args = json!({"path": "src/lib.rs", "content": "fn main() {}"});
    let context = RequestContext {
        display_info: registry.format_permission_request("edit_file", &args),
        ..Default::default()
    };
    let (allowed, _) = engine.check_permission("edit_file", &args, context).await;
    assert!(allowed);

    let prompt = buf.contents();
    assert!(prompt.contains("Update file: src/lib.rs"), "summary missing:\n{prompt}");
    assert!(prompt.contains("+new line"), "details missing:\n{prompt}");
    // The custom rendering replaces the raw JSON argument dump.
    assert!(!prompt.contains("fn main() {}"), "raw args leaked:\n{prompt}");
}

#[tokio::test]
async fn always_decision_persists_for_the_session() {
    let (channel, _) = console_with_input("a\n");
    let mut engine = PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Ask))
        .with_channel(Box::new(channel));

    let args = json!({"path": "a.rs"});
    let (allowed, _) =
        engine.check_permission("edit_file", &args, RequestContext::default()).await;
    assert!(allowed);

    // The channel's input is exhausted: a second prompt would deny via EOF.
    // The remembered session rule decides instead.
    let (allowed, reason) =
        engine.check_permission("edit_file", &args, RequestContext::default()).await;
    assert!(allowed, "session rule should decide without the channel: {reason}");
    assert_eq!(engine.audit_log().len(), 2);
}

#[tokio::test]
async fn never_decision_blocks_for_the_session() {
    let (channel, _) = console_with_input("never\n");
    let mut engine = PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Ask))
        .with_channel(Box::new(channel));

    let args = json!({"path": "a.rs"});
    let (allowed, _) =
        engine.check_permission("edit_file", &args, RequestContext::default()).await;
    assert!(!allowed);

    let (allowed, reason) =
        engine.check_permission("edit_file", &args, RequestContext::default()).await;
    assert!(!allowed);
    assert!(reason.contains("session"), "unexpected reason: {reason}");
}

#[tokio::test]
async fn probe_answers_from_policy_and_registry_state() {
    let registry = exposed_registry();
    let mut engine = PermissionEngine::new(PermissionPolicy::with_default(DefaultPolicy::Deny));
    engine.add_whitelist_tools(registry.auto_approved_names());

    let probe = engine
        .ask_permission(
            &json!({"tool_name": "report_progress", "arguments": {}}),
            RequestContext::default(),
        )
        .await;
    assert_eq!(probe["allowed"], json!(true));

    let probe = engine
        .ask_permission(
            &json!({"tool_name": "edit_file", "arguments": {"path": "a.rs"}}),
            RequestContext::default(),
        )
        .await;
    assert_eq!(probe["allowed"], json!(false));
}
