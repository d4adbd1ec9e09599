//! Gemini `streamGenerateContent` transport.
//!
//! Gemini streams additive fragments. The transport folds them into running
//! snapshots (answer text, signature-less thoughts, function calls) so every
//! emitted [`StreamChunk`] carries the full state so far; signed thought parts
//! are passed through as received.

use {
    anyhow::{Result, anyhow},
    futures::StreamExt,
    secrecy::{ExposeSecret, Secret},
    serde_json::{Map, Value, json},
    tracing::{debug, trace, warn},
};

use crate::model::{
    ChunkPart, ChunkStream, Content, FunctionCall, GenerateConfig, GenerateRequest,
    ModelTransport, Part, StreamChunk,
};

/// Information about a Gemini model returned from the API.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiModelInfo {
    /// Full resource name (e.g., "models/gemini-2.5-flash")
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Maximum input tokens (context window)
    #[serde(default)]
    pub input_token_limit: u32,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

impl GeminiModelInfo {
    /// "models/gemini-2.5-flash" -> "gemini-2.5-flash"
    pub fn model_id(&self) -> &str {
        self.name.strip_prefix("models/").unwrap_or(&self.name)
    }

    /// Whether the model can be used with `streamGenerateContent`.
    pub fn supports_streaming(&self) -> bool {
        self.supported_generation_methods
            .iter()
            .any(|m| m == "streamGenerateContent")
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<GeminiModelInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct GeminiTransport {
    api_key: Secret<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiTransport {
    pub fn new(api_key: Secret<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Models that support streaming generation, sorted by name.
    pub async fn list_models(&self) -> Result<Vec<GeminiModelInfo>> {
        let mut all_models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/v1beta/models", self.base_url))
                .header("x-goog-api-key", self.api_key.expose_secret());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let resp = request.send().await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("failed to list Gemini models: HTTP {status}: {body}");
            }

            let page: ListModelsResponse = resp.json().await?;
            all_models.extend(page.models);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        let mut models: Vec<_> = all_models
            .into_iter()
            .filter(GeminiModelInfo::supports_streaming)
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }
}

/// Convert JSON Schema types (lowercase) to Gemini types (uppercase).
/// Recursively handles nested objects and arrays.
fn convert_json_schema_types(schema: &Value) -> Value {
    match schema {
        Value::Object(obj) => {
            let mut result = Map::new();
            for (key, value) in obj {
                let converted = match key.as_str() {
                    "type" => match value.as_str() {
                        Some(t) => Value::String(t.to_uppercase()),
                        None => value.clone(),
                    },
                    "properties" => match value {
                        Value::Object(props) => Value::Object(
                            props
                                .iter()
                                .map(|(k, v)| (k.clone(), convert_json_schema_types(v)))
                                .collect(),
                        ),
                        other => other.clone(),
                    },
                    "items" => convert_json_schema_types(value),
                    _ => value.clone(),
                };
                result.insert(key.clone(), converted);
            }
            Value::Object(result)
        },
        Value::Array(arr) => Value::Array(arr.iter().map(convert_json_schema_types).collect()),
        _ => schema.clone(),
    }
}

/// One content entry in wire form. Function-call signatures go on the part,
/// next to `functionCall`.
fn wire_content(content: &Content) -> Value {
    let parts: Vec<Value> = content
        .parts
        .iter()
        .map(|part| {
            let mut value = serde_json::to_value(part).unwrap_or(Value::Null);
            if let Part::FunctionCall(FunctionCall {
                thought_signature: Some(signature),
                ..
            }) = part
            {
                value["thoughtSignature"] = json!(signature);
            }
            value
        })
        .collect();
    json!({ "role": content.role, "parts": parts })
}

/// Request body for `streamGenerateContent`.
fn request_body(request: &GenerateRequest) -> Value {
    let GenerateConfig {
        system_instruction,
        tools,
        thinking,
    } = &request.config;

    let contents: Vec<Value> = request.contents.iter().map(wire_content).collect();
    let mut body = json!({ "contents": contents });
    if let Some(system) = system_instruction.as_deref().filter(|s| !s.is_empty()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": convert_json_schema_types(&t.parameters),
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    if let Some(thinking) = thinking {
        body["generationConfig"] = json!({ "thinkingConfig": thinking });
    }
    body
}

// ── SSE decoding ────────────────────────────────────────────────────────────

/// Splits a byte stream into SSE `data:` payloads.
///
/// Bytes are buffered until an event terminator so multi-byte characters split
/// across network chunks decode correctly.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no complete terminator.
    scanned: usize,
}

impl SseDecoder {
    fn next_boundary(&self) -> Option<(usize, usize)> {
        // A terminator can straddle the old tail, so back up by its length - 1.
        let start = self.scanned.saturating_sub(3);
        let tail = &self.buf[start..];
        let lf = find(tail, b"\n\n").map(|p| (start + p, 2));
        let crlf = find(tail, b"\r\n\r\n").map(|p| (start + p, 4));
        match (lf, crlf) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some((pos, len)) = self.next_boundary() {
            let block: Vec<u8> = self.buf.drain(..pos + len).collect();
            self.scanned = 0;
            payloads.extend(data_of(&block[..pos]));
        }
        self.scanned = self.buf.len();
        payloads
    }

    /// Whatever is left once the body ends without a trailing blank line.
    fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        let block = std::mem::take(&mut self.buf);
        data_of(&block)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn data_of(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            line.strip_prefix("data:").map(|d| d.strip_prefix(' ').unwrap_or(d))
        })
        .collect();
    (!data.is_empty()).then(|| data.join("\n"))
}

// ── Response folding ────────────────────────────────────────────────────────

/// Running snapshots of one streamed response.
#[derive(Default)]
struct ResponseFolder {
    text: String,
    thoughts: String,
    calls: Vec<FunctionCall>,
}

impl ResponseFolder {
    /// Fold one SSE event. `Ok(None)` when the event changed nothing visible.
    fn apply(&mut self, event: &Value) -> Result<Option<StreamChunk>> {
        if let Some(error) = event.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("Gemini API error: {message}"));
        }
        if let Some(reason) = event["promptFeedback"]["blockReason"].as_str() {
            return Err(anyhow!("Gemini blocked the prompt: {reason}"));
        }

        let Some(parts) = event["candidates"][0]["content"]["parts"].as_array() else {
            return Ok(None);
        };

        let mut chunk = StreamChunk::default();
        let mut text_changed = false;
        let mut thoughts_changed = false;
        let mut calls_changed = false;

        for part in parts {
            if let Some(call) = part.get("functionCall") {
                let name = call["name"].as_str().unwrap_or_default();
                if name.is_empty() {
                    warn!("ignoring function call without a name");
                    continue;
                }
                let mut function_call =
                    FunctionCall::new(name, call.get("args").cloned().unwrap_or_default());
                function_call.thought_signature = part["thoughtSignature"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .map(String::from);
                self.calls.push(function_call);
                calls_changed = true;
                continue;
            }
            let Some(text) = part["text"].as_str() else {
                continue;
            };
            if part["thought"].as_bool().unwrap_or(false) {
                match part["thoughtSignature"].as_str().filter(|s| !s.is_empty()) {
                    Some(signature) => chunk.parts.push(ChunkPart::thought(text, Some(signature))),
                    None => {
                        self.thoughts.push_str(text);
                        thoughts_changed = true;
                    },
                }
            } else if !text.is_empty() {
                self.text.push_str(text);
                text_changed = true;
            }
        }

        if thoughts_changed {
            chunk.parts.push(ChunkPart::thought(self.thoughts.clone(), None));
        }
        if text_changed {
            chunk.text = Some(self.text.clone());
        }
        if calls_changed {
            chunk.function_calls = self.calls.clone();
        }

        if chunk == StreamChunk::default() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}

impl ModelTransport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    fn stream_generate(&self, request: GenerateRequest) -> ChunkStream<'_> {
        Box::pin(async_stream::stream! {
            let body = request_body(&request);
            let url = format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, request.model
            );
            debug!(model = %request.model, contents = request.contents.len(), "gemini stream request");

            let resp = match self
                .client
                .post(&url)
                .header("x-goog-api-key", self.api_key.expose_secret())
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => {
                    let status = r.status();
                    if !status.is_success() {
                        let body_text = r.text().await.unwrap_or_default();
                        yield Err(anyhow!("Gemini API error: HTTP {}: {body_text}", status.as_u16()));
                        return;
                    }
                    r
                },
                Err(e) => {
                    yield Err(anyhow!(e).context("Gemini request failed"));
                    return;
                },
            };

            let mut byte_stream = resp.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut folder = ResponseFolder::default();

            loop {
                let (payloads, ended) = match byte_stream.next().await {
                    Some(Ok(bytes)) => (decoder.push(&bytes), false),
                    Some(Err(e)) => {
                        yield Err(anyhow!(e).context("Gemini stream interrupted"));
                        return;
                    },
                    None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
                };

                for data in payloads {
                    trace!(data = %data, "gemini sse event");
                    let event: Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed Gemini SSE event");
                            continue;
                        },
                    };
                    match folder.apply(&event) {
                        Ok(Some(chunk)) => yield Ok(chunk),
                        Ok(None) => {},
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    }
                }

                if ended {
                    break;
                }
            }
        })
    }
}
