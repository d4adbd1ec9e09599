//! Turn successive stream snapshots (or fragments) into append-only deltas.

/// Outcome of reconciling one update against the tracked text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaResult {
    /// Newly revealed text, if any.
    pub delta: Option<String>,
    /// The tracked text after this update.
    pub full: String,
}

impl DeltaResult {
    fn unchanged(previous: &str) -> Self {
        Self {
            delta: None,
            full: previous.to_string(),
        }
    }
}

/// Reconcile `next` against `previous`.
///
/// Growing snapshots yield their new suffix. Empty, identical or shorter
/// resent snapshots never regress the tracked text. Divergent updates with no
/// shared prefix are treated as fragments and appended; with a shared prefix
/// the new snapshot replaces the tracked text and the part past the prefix is
/// emitted.
pub fn compute_delta(previous: &str, next: Option<&str>) -> DeltaResult {
    let Some(next) = next else {
        return DeltaResult::unchanged(previous);
    };
    if next.is_empty() || next == previous {
        return DeltaResult::unchanged(previous);
    }
    if previous.is_empty() {
        return DeltaResult {
            delta: Some(next.to_string()),
            full: next.to_string(),
        };
    }
    if let Some(suffix) = next.strip_prefix(previous) {
        return DeltaResult {
            delta: (!suffix.is_empty()).then(|| suffix.to_string()),
            full: next.to_string(),
        };
    }
    if previous.starts_with(next) {
        return DeltaResult::unchanged(previous);
    }

    match shared_prefix_len(previous, next) {
        0 => DeltaResult {
            delta: Some(next.to_string()),
            full: format!("{previous}{next}"),
        },
        shared => DeltaResult {
            delta: Some(next[shared..].to_string()),
            full: next.to_string(),
        },
    }
}

/// Byte length of the longest common leading run, on a char boundary.
fn shared_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, c), _)| i + c.len_utf8())
}
