//! Image payloads embedded in tool results.
//!
//! Tools such as screenshot capture return `{ "base64": ..., "mimeType": ... }`
//! (at the top level or under an `image` key). Before a result is echoed to the
//! model the payload is lifted out into an inline-data part, so the model can
//! look at the image without the base64 text bloating the function response.

use serde_json::{Map, Value};

use crate::model::InlineData;

/// Keys that may carry the base64 payload, in lookup order.
const PAYLOAD_KEYS: &[&str] = &["base64", "data"];

/// Parse a `data:<media>;base64,<payload>` URI.
pub fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    if media_type.is_empty() || data.is_empty() {
        return None;
    }
    Some((media_type, data))
}

/// Split an embedded image out of a tool result.
///
/// Returns the result with the payload removed, plus the image if one was
/// found. Results without an image come back unchanged.
pub fn extract_image(mut result: Value) -> (Value, Option<InlineData>) {
    let Some(obj) = result.as_object_mut() else {
        return (result, None);
    };

    if let Some(image) = take_image(obj) {
        return (result, Some(image));
    }
    let nested = obj
        .get_mut("image")
        .and_then(Value::as_object_mut)
        .and_then(take_image);
    (result, nested)
}

fn take_image(obj: &mut Map<String, Value>) -> Option<InlineData> {
    let key = PAYLOAD_KEYS
        .iter()
        .copied()
        .find(|k| obj.get(*k).and_then(Value::as_str).is_some_and(|s| !s.is_empty()))?;
    let payload = obj.get(key).and_then(Value::as_str)?;
    let declared = obj.get("mimeType").and_then(Value::as_str);

    let (mime_type, data) = match parse_data_uri(payload) {
        Some((media, data)) => (declared.unwrap_or(media).to_string(), data.to_string()),
        None => (declared?.to_string(), payload.to_string()),
    };
    if !mime_type.starts_with("image/") {
        return None;
    }

    obj.remove(key);
    Some(InlineData { mime_type, data })
}
