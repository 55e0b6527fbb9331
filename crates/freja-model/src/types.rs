use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

/// Who produced a message.  Tool responses travel back to the model inside a
/// `User` message, mirroring the chat wire format: the model only ever sees
/// two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single content part inside a message.
///
/// - `Text` – plain text (most parts)
/// - `ToolCall` – the model requests a tool invocation
/// - `ToolResponse` – the result of a tool call, fed back to the model
/// - `InlineBlob` – raw binary content (base64) the model can interpret
///   natively, e.g. an image produced by a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    ToolCall {
        name: String,
        args: Value,
    },
    ToolResponse {
        name: String,
        payload: Value,
    },
    InlineBlob {
        mime_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self::ToolCall { name: name.into(), args }
    }

    pub fn tool_response(name: impl Into<String>, payload: Value) -> Self {
        Self::ToolResponse { name: name.into(), payload }
    }

    pub fn inline_blob(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineBlob { mime_type: mime_type.into(), data: data.into() }
    }

    /// Character weight of this part for token estimation.
    fn estimate_chars(&self) -> usize {
        match self {
            Part::Text { text } => text.len(),
            Part::ToolCall { name, args } => name.len() + args.to_string().len(),
            Part::ToolResponse { name, payload } => name.len() + payload.to_string().len(),
            Part::InlineBlob { data, .. } => data.len(),
        }
    }
}

/// A single message in the conversation history.  Messages are append-only:
/// once pushed into a history they are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, parts: vec![Part::text(text)] }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, parts: vec![Part::text(text)] }
    }

    pub fn user_parts(parts: Vec<Part>) -> Self {
        Self { role: Role::User, parts }
    }

    pub fn model_parts(parts: Vec<Part>) -> Self {
        Self { role: Role::Model, parts }
    }

    /// A user-role message carrying tool responses back to the model.
    pub fn tool_responses(parts: Vec<Part>) -> Self {
        Self { role: Role::User, parts }
    }

    /// Return the plain text of this message if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [Part::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// True when this user message answers tool calls rather than starting a
    /// new turn.
    pub fn is_tool_response(&self) -> bool {
        self.role == Role::User
            && self.parts.iter().any(|p| matches!(p, Part::ToolResponse { .. }))
    }

    /// Approximate token count used for context management.
    ///
    /// Sums character lengths across all parts and divides by 4, clamped to a
    /// minimum of 1 per message.  Deliberately approximate: this is the
    /// canonical estimator shared by GC, the driver, and tests.
    pub fn approx_tokens(&self) -> usize {
        let chars: usize = self.parts.iter().map(Part::estimate_chars).sum();
        (chars / 4).max(1)
    }
}

/// Estimate the total token count of a history slice.
pub fn estimate_history_tokens(history: &[Message]) -> usize {
    history.iter().map(Message::approx_tokens).sum()
}

// ─── Tool types ───────────────────────────────────────────────────────────────

/// A tool declaration provided to the model.  Immutable after a plugin has
/// been exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    /// Parsed JSON argument object
    pub args: Value,
}

/// The result of executing a tool.
///
/// Executors return JSON-serializable payloads; errors are values, never
/// panics.  The `Multimodal` variant instructs the driver to build a response
/// pair: a structured `tool_response` part referencing the blob by display
/// name plus a sibling `inline_blob` part carrying the bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Ok(Value),
    Err(String),
    Multimodal {
        mime_type: String,
        /// Base64-encoded bytes.
        data: String,
        descriptor: serde_json::Map<String, Value>,
    },
}

impl ToolResult {
    pub fn ok(payload: Value) -> Self {
        Self::Ok(payload)
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self::Err(msg.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Flatten into the payload object fed back to the model.  Errors become
    /// `{"error": <message>}` so the loop can continue.
    pub fn into_payload(self) -> Value {
        match self {
            Self::Ok(v) if v.is_object() => v,
            Self::Ok(v) => serde_json::json!({ "result": v }),
            Self::Err(msg) => serde_json::json!({ "error": msg }),
            Self::Multimodal { descriptor, .. } => Value::Object(descriptor),
        }
    }
}

// ─── Model responses ──────────────────────────────────────────────────────────

/// Token usage from one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, output_tokens: u32) -> Self {
        Self { prompt_tokens, output_tokens, total_tokens: prompt_tokens + output_tokens }
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One model turn: text (possibly empty), zero or more tool-call requests,
/// and the usage accounting for the call.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn text_only(text: impl Into<String>, usage: Usage) -> Self {
        Self { text: text.into(), tool_calls: Vec::new(), usage }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
