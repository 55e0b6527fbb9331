// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::ConfigError;

/// Environment variable consulted when no explicit config path is given.
pub const PERMISSION_CONFIG_ENV: &str = "PERMISSION_CONFIG_PATH";

/// What the policy engine does when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    Allow,
    #[default]
    Deny,
    Ask,
}

/// Which approval channel resolves ambiguous permission requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[default]
    Console,
    Webhook,
    File,
    Queue,
}

/// Per-tool, per-argument blocked/allowed value lists.
///
/// `{ "<tool>": { "<arg>": ["value", ...] } }`.  A blocked value matches an
/// argument by string prefix or by whitespace-token containment.
pub type ArgumentRules = HashMap<String, HashMap<String, Vec<String>>>;

/// One color of the rule set (the blacklist and whitelist share a shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRules {
    pub tools: Vec<String>,
    pub patterns: Vec<String>,
    pub arguments: ArgumentRules,
}

/// Approval channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Per-request approval timeout in seconds.
    pub timeout: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { channel_type: ChannelType::Console, endpoint: None, timeout: 30 }
    }
}

/// Structured representation of a `permissions.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub version: String,
    #[serde(rename = "defaultPolicy")]
    pub default_policy: DefaultPolicy,
    pub blacklist: ListRules,
    pub whitelist: ListRules,
    pub channel: ChannelConfig,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            version: "1.0".into(),
            default_policy: DefaultPolicy::Ask,
            blacklist: ListRules {
                tools: Vec::new(),
                patterns: vec![
                    "rm -rf *".into(),
                    "sudo *".into(),
                    "chmod 777 *".into(),
                ],
                arguments: HashMap::from([(
                    "shell".to_string(),
                    HashMap::from([(
                        "command".to_string(),
                        vec![
                            "rm -rf".to_string(),
                            "sudo".to_string(),
                            "shutdown".to_string(),
                            "reboot".to_string(),
                        ],
                    )]),
                )]),
            },
            whitelist: ListRules::default(),
            channel: ChannelConfig::default(),
        }
    }
}

/// Search order used when no explicit path is given.  The first existing
/// file wins; when none exists the built-in defaults apply.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("permissions.json"),
        PathBuf::from(".permissions.json"),
    ];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/freja/permissions.json"));
    }
    paths
}

/// Load and validate a permission configuration.
///
/// Resolution order: explicit `path` → `$PERMISSION_CONFIG_PATH` →
/// `./permissions.json` → `./.permissions.json` →
/// `$HOME/.config/freja/permissions.json` → built-in defaults.
///
/// An explicit or env-supplied path that does not exist is an error; a
/// missing default-location file silently falls through to the next
/// candidate.  Unknown top-level keys are ignored; an unknown
/// `defaultPolicy` or channel type is a hard error.
pub fn load_permission_config(path: Option<&Path>) -> Result<PermissionConfig, ConfigError> {
    let resolved: Option<PathBuf> = match path {
        Some(p) => Some(p.to_path_buf()),
        None => match std::env::var(PERMISSION_CONFIG_ENV) {
            Ok(p) if !p.is_empty() => Some(PathBuf::from(p)),
            _ => config_search_paths().into_iter().find(|p| p.is_file()),
        },
    };

    let Some(file) = resolved else {
        return Ok(PermissionConfig::default());
    };
    if !file.is_file() {
        return Err(ConfigError::NotFound(file));
    }

    let text = std::fs::read_to_string(&file)
        .map_err(|source| ConfigError::Io { path: file.clone(), source })?;
    let raw: Value = serde_json::from_str(&text)
        .map_err(|source| ConfigError::Parse { path: file.clone(), source })?;

    let (errors, warnings) = validate_permission_config(&raw);
    for w in warnings {
        warn!(config = %file.display(), "{w}");
    }
    if !errors.is_empty() {
        return Err(ConfigError::Validation { errors });
    }

    serde_json::from_value(raw).map_err(|source| ConfigError::Parse { path: file, source })
}

/// Validate a raw permission config value.
///
/// Returns `(errors, warnings)`: errors abort loading; warnings (a tool in
/// both static lists, which the blacklist wins) are logged and tolerated.
pub fn validate_permission_config(raw: &Value) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(obj) = raw.as_object() else {
        errors.push("config root must be an object".into());
        return (errors, warnings);
    };

    if let Some(v) = obj.get("version") {
        match v.as_str() {
            Some("1.0") | Some("1") => {}
            Some(other) => errors.push(format!("unsupported config version: {other}")),
            None => errors.push("'version' must be a string".into()),
        }
    }

    if let Some(v) = obj.get("defaultPolicy") {
        match v.as_str() {
            Some("allow") | Some("deny") | Some("ask") => {}
            _ => errors.push(format!(
                "invalid defaultPolicy: {v}. Must be 'allow', 'deny', or 'ask'"
            )),
        }
    }

    for list in ["blacklist", "whitelist"] {
        if let Some(v) = obj.get(list) {
            match v.as_object() {
                Some(rules) => validate_list_rules(rules, list, &mut errors),
                None => errors.push(format!("'{list}' must be an object")),
            }
        }
    }

    if let Some(channel) = obj.get("channel").and_then(Value::as_object) {
        if let Some(t) = channel.get("type") {
            match t.as_str() {
                Some("console") | Some("webhook") | Some("file") | Some("queue") => {}
                _ => errors.push(format!("invalid channel type: {t}")),
            }
        }
        if channel.get("type").and_then(Value::as_str) == Some("webhook")
            && channel.get("endpoint").and_then(Value::as_str).is_none()
        {
            errors.push("webhook channel requires 'endpoint' URL".into());
        }
        if let Some(timeout) = channel.get("timeout") {
            if timeout.as_u64().is_none() || timeout.as_u64() == Some(0) {
                errors.push("channel timeout must be a positive number".into());
            }
        }
    }

    // Same tool in both static lists: accepted (blacklist wins) but likely a
    // configuration mistake.
    let tools_of = |list: &str| -> Vec<String> {
        obj.get(list)
            .and_then(|l| l.get("tools"))
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };
    let bl = tools_of("blacklist");
    for tool in tools_of("whitelist") {
        if bl.contains(&tool) {
            warnings.push(format!(
                "tool '{tool}' appears in both blacklist and whitelist (blacklist wins)"
            ));
        }
    }

    (errors, warnings)
}

fn validate_list_rules(
    rules: &serde_json::Map<String, Value>,
    list: &str,
    errors: &mut Vec<String>,
) {
    for field in ["tools", "patterns"] {
        if let Some(v) = rules.get(field) {
            match v.as_array() {
                Some(items) if items.iter().all(Value::is_string) => {}
                Some(_) => errors.push(format!("'{list}.{field}' must contain only strings")),
                None => errors.push(format!("'{list}.{field}' must be an array")),
            }
        }
    }
    if let Some(v) = rules.get("arguments") {
        match v.as_object() {
            Some(tools) => {
                for (tool, arg_rules) in tools {
                    let Some(args) = arg_rules.as_object() else {
                        errors.push(format!("'{list}.arguments.{tool}' must be an object"));
                        continue;
                    };
                    for (arg, values) in args {
                        match values.as_array() {
                            Some(items) if items.iter().all(Value::is_string) => {}
                            _ => errors.push(format!(
                                "'{list}.arguments.{tool}.{arg}' must be an array of strings"
                            )),
                        }
                    }
                }
            }
            None => errors.push(format!("'{list}.arguments' must be an object")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
