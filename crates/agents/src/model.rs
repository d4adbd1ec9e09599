use std::pin::Pin;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio_stream::Stream,
};

// ── Conversation contents ───────────────────────────────────────────────────

/// Who produced a content entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Usually an object, but some transports hand arguments over as a
    /// serialized JSON string.
    #[serde(default)]
    pub args: Value,
    /// Opaque signature the model attached to this call. Transports that
    /// issue one expect it echoed back on the same part next turn, so it
    /// rides along here rather than inside the call payload.
    #[serde(skip)]
    pub thought_signature: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
            thought_signature: None,
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.thought_signature = Some(signature.into());
        self
    }
}

/// A tool result echoed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// Binary payload (e.g. a screenshot) attached to a content entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// One part of a content entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    InlineData(InlineData),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self::FunctionResponse(FunctionResponse {
            name: name.into(),
            response,
        })
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineData(InlineData {
            mime_type: mime_type.into(),
            data: data.into(),
        })
    }
}

/// A role-tagged bundle of parts: one entry of the running conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    /// Names of every function response carried by this entry.
    pub fn function_response_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionResponse(r) => Some(r.name.as_str()),
            _ => None,
        })
    }
}

// ── Generation requests ─────────────────────────────────────────────────────

/// A callable tool as declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub include_thoughts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,
}

/// Per-request generation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionDeclaration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub contents: Vec<Content>,
    pub config: GenerateConfig,
}

// ── Streaming ───────────────────────────────────────────────────────────────

/// A raw part of a streamed chunk, as far as thought aggregation cares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPart {
    pub text: Option<String>,
    pub thought: bool,
    pub thought_signature: Option<String>,
}

impl ChunkPart {
    pub fn thought(text: impl Into<String>, signature: Option<&str>) -> Self {
        Self {
            text: Some(text.into()),
            thought: true,
            thought_signature: signature.map(String::from),
        }
    }
}

/// One unit of a streaming model response.
///
/// `text` may be a cumulative snapshot or an additive fragment; the stream
/// executor reconciles either form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub text: Option<String>,
    pub parts: Vec<ChunkPart>,
    pub function_calls: Vec<FunctionCall>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn calls(function_calls: Vec<FunctionCall>) -> Self {
        Self {
            function_calls,
            ..Default::default()
        }
    }
}

pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send + 'a>>;

/// Streaming access to a generative model.
pub trait ModelTransport: Send + Sync {
    /// Transport name used in logs.
    fn name(&self) -> &str;

    /// Start one streaming generation. Transport failures surface as `Err`
    /// items; the stream ends after the first error.
    fn stream_generate(&self, request: GenerateRequest) -> ChunkStream<'_>;
}
