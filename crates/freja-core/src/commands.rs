// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::{Map, Value};

use freja_plugins::UserCommand;

/// Parse a free-form argument string against a command's declared
/// parameters.
///
/// `key=value` tokens become named arguments; remaining tokens are joined
/// and assigned to the first declared parameter that has not been set.
/// With no declared parameters, leftover text lands under `"args"` so the
/// executor still sees it.
pub fn parse_command_args(command: &UserCommand, raw: &str) -> Value {
    let mut args = Map::new();
    let mut positional: Vec<&str> = Vec::new();

    for token in raw.split_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                args.insert(key.to_string(), Value::String(value.to_string()));
            }
            _ => positional.push(token),
        }
    }

    if !positional.is_empty() {
        let joined = positional.join(" ");
        let slot = command
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .find(|name| !args.contains_key(*name));
        match slot {
            Some(name) => {
                args.insert(name.to_string(), Value::String(joined));
            }
            None => {
                args.insert("args".to_string(), Value::String(joined));
            }
        }
    }

    Value::Object(args)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
