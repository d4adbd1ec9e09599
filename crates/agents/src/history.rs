//! Stored chat history to model contents.
//!
//! Persisted messages look like
//! `{"role": "user"|"assistant", "content": "...", "attachments": [...], "toolEvents": [...]}`.
//! An assistant message that used tools is replayed as the exchange the model
//! originally saw: its function calls, then the matching responses, then the
//! final answer text.

use {
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use crate::{
    events::ToolEvent,
    model::{Content, FunctionCall, Part},
    multimodal::{extract_image, parse_data_uri},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredRole {
    User,
    #[serde(alias = "model")]
    Assistant,
}

/// A file attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Base64 payload or a `data:` URI.
    pub data: String,
}

impl Attachment {
    pub(crate) fn to_part(&self) -> Option<Part> {
        match parse_data_uri(&self.data) {
            Some((media, data)) => Some(Part::inline_data(
                self.mime_type.as_deref().unwrap_or(media),
                data,
            )),
            None => self
                .mime_type
                .as_deref()
                .map(|mime| Part::inline_data(mime, self.data.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub role: StoredRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tool_events: Vec<ToolEvent>,
}

/// Response payload replayed for a settled event. Images are dropped; the
/// model already looked at them on the turn they were produced.
fn replayed_response(event: &ToolEvent) -> Value {
    match (&event.result, &event.error) {
        (_, Some(error)) => json!({ "ok": false, "error": error }),
        (Some(result), None) => {
            let (sanitized, _) = extract_image(result.clone());
            json!({ "ok": true, "result": sanitized })
        },
        (None, None) => Value::Null,
    }
}

fn push_message(contents: &mut Vec<Content>, message: StoredMessage) {
    match message.role {
        StoredRole::User => {
            let mut parts = Vec::with_capacity(1 + message.attachments.len());
            if !message.content.is_empty() {
                parts.push(Part::text(message.content));
            }
            for attachment in &message.attachments {
                match attachment.to_part() {
                    Some(part) => parts.push(part),
                    None => debug!("skipping attachment without a MIME type"),
                }
            }
            if !parts.is_empty() {
                contents.push(Content::user(parts));
            }
        },
        StoredRole::Assistant => {
            // Pending events have no response; replaying their call alone
            // would leave the model with an unanswered call.
            let settled: Vec<&ToolEvent> = message
                .tool_events
                .iter()
                .filter(|e| !e.is_pending())
                .collect();
            if !settled.is_empty() {
                contents.push(Content::model(
                    settled
                        .iter()
                        .map(|e| Part::FunctionCall(FunctionCall::new(&e.name, e.args.clone())))
                        .collect(),
                ));
                contents.push(Content::user(
                    settled
                        .iter()
                        .map(|e| Part::function_response(&e.name, replayed_response(e)))
                        .collect(),
                ));
            }
            if !message.content.is_empty() {
                contents.push(Content::model(vec![Part::text(message.content)]));
            }
        },
    }
}

/// Convert stored messages into contents. Entries that do not parse are
/// logged and skipped.
pub fn history_to_contents(history: &[Value]) -> Vec<Content> {
    let mut contents = Vec::with_capacity(history.len());
    for (index, raw) in history.iter().enumerate() {
        match serde_json::from_value::<StoredMessage>(raw.clone()) {
            Ok(message) => push_message(&mut contents, message),
            Err(e) => warn!(index, error = %e, "skipping invalid history entry"),
        }
    }
    contents
}
