//! Fundamental types: chat messages, request items, predictions, dataset
//! records, and the provider request/response envelope.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// The role of a message in a two-turn request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One unit of work for the dispatcher: an instruction turn plus a query turn.
///
/// On disk an item is the bare message array (one JSONL line). The `id` is
/// carried alongside so reconciliation never has to re-parse prompt text;
/// when an item is read back, the id is derived once from the user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestItem {
    pub id: Option<String>,
    pub messages: Vec<ChatMessage>,
}

impl RequestItem {
    /// Build a standard system + user item with a known id.
    pub fn new(id: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
        }
    }

    /// Wrap loaded messages, deriving the id from the user turn.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let id = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .find_map(|m| crate::reconcile::extract_embedded_id(&m.content));
        Self { id, messages }
    }

    /// Text of the first user turn, if any.
    pub fn user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Human-readable label for logs.
    pub fn label(&self, index: usize) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("#{}", index),
        }
    }
}

impl Serialize for RequestItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.messages.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RequestItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let messages = Vec::<ChatMessage>::deserialize(deserializer)?;
        Ok(Self::from_messages(messages))
    }
}

/// A term-typing prediction produced by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

/// A prediction with the reason stripped, as submitted for scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: String,
    pub types: Vec<String>,
}

impl From<Prediction> for SubmissionRecord {
    fn from(p: Prediction) -> Self {
        Self {
            id: p.id,
            types: p.types,
        }
    }
}

/// A record of a train or test split.
///
/// Test splits usually omit `types`; train splits always carry them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub id: String,
    #[serde(default)]
    pub term: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
}

/// JSON schema the provider is asked to honour for its answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl ResponseSchema {
    /// Schema of a [`Prediction`].
    pub fn term_typing() -> Self {
        Self {
            name: "TermTyping".to_string(),
            description: "Ontology types assigned to a term, with a short justification"
                .to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "types": { "type": "array", "items": { "type": "string" } },
                    "reason": { "type": "string" }
                },
                "required": ["id", "types", "reason"]
            }),
        }
    }

    /// Variant for OpenAI strict mode, which requires closed objects.
    pub fn strict_schema(&self) -> Value {
        let mut schema = self.schema.clone();
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("additionalProperties".to_string(), Value::Bool(false));
        }
        schema
    }
}

/// Token usage reported by a provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A request to the LLM for completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub response_schema: Option<ResponseSchema>,
    pub model: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
            response_schema: None,
            model: None,
        }
    }
}

/// A provider's answer to a [`CompletionRequest`].
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Concatenated text output (may be empty when `structured` is set).
    pub text: String,
    /// Structured payload, when the provider returned one directly (e.g. a forced tool call).
    pub structured: Option<Value>,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}
