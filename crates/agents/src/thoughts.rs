//! Reassemble "thinking" text from parallel, signature-keyed thought streams.
//!
//! A model may interleave several reasoning threads in one response, each
//! tagged with an opaque signature. Each thread (plus the signature-less one)
//! is reconciled on its own, and only the resulting deltas are appended to the
//! merged transcript.

use std::collections::HashMap;

use crate::{
    delta::{DeltaResult, compute_delta},
    model::ChunkPart,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThoughtState {
    /// Merged transcript; only ever appended to.
    pub full: String,
    /// Accumulated text of thought parts that carry no signature.
    pub signatureless_full: String,
    /// Accumulated text per signature.
    pub signature_parts: HashMap<String, String>,
}

impl ThoughtState {
    /// Fold one chunk's parts into the state.
    ///
    /// Returns the text appended to [`ThoughtState::full`], if any. Parts not
    /// flagged as thoughts are ignored.
    pub fn apply(&mut self, parts: &[ChunkPart]) -> Option<String> {
        let mut chunk_delta = String::new();
        let mut signatureless: Option<String> = None;

        for part in parts.iter().filter(|p| p.thought) {
            let Some(text) = part.text.as_deref() else {
                continue;
            };
            match part.thought_signature.as_deref().filter(|s| !s.is_empty()) {
                Some(signature) => {
                    let prior = self.signature_parts.get(signature);
                    let first_seen = prior.is_none();
                    let (delta, full) = reconcile(
                        prior.map(String::as_str).unwrap_or_default(),
                        text,
                        first_seen,
                    );
                    self.signature_parts.insert(signature.to_string(), full);
                    if let Some(delta) = delta {
                        chunk_delta.push_str(&delta);
                    }
                },
                None => signatureless.get_or_insert_with(String::new).push_str(text),
            }
        }

        if let Some(joined) = signatureless {
            let first_seen = self.signatureless_full.is_empty();
            let (delta, full) = reconcile(&self.signatureless_full, &joined, first_seen);
            self.signatureless_full = full;
            if let Some(delta) = delta {
                chunk_delta.push_str(&delta);
            }
        }

        if chunk_delta.is_empty() {
            return None;
        }
        self.full.push_str(&chunk_delta);
        Some(chunk_delta)
    }
}

/// Delta reconciliation with the first-observation fallback: a thread seen
/// for the first time always contributes its whole text.
fn reconcile(prior: &str, next: &str, first_seen: bool) -> (Option<String>, String) {
    let DeltaResult { delta, full } = compute_delta(prior, Some(next));
    let delta = delta
        .filter(|d| !d.is_empty())
        .or_else(|| (first_seen && !full.is_empty()).then(|| full.clone()));
    (delta, full)
}
