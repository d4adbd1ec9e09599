//! Observer surface of a run: events, callback type, cancellation predicate.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

/// Record of one dispatched tool call.
///
/// Pending while both `result` and `error` are `None`; exactly one of them is
/// set once the handler settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolEvent {
    pub fn pending(name: impl Into<String>, display_name: Option<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            display_name,
            args,
            result: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none() && self.error.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    /// Human label, falling back to the tool name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Events emitted during a run, in loop order.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// Newly revealed answer text.
    TextDelta(String),
    /// Full answer text of the current turn.
    TextUpdate(String),
    ThinkingDelta(String),
    ThinkingUpdate(String),
    ToolCallStart(ToolEvent),
    ToolCallEnd(ToolEvent),
    /// A streaming turn is about to start (1-based).
    Iteration(usize),
}

/// Callback for streaming events out of the runner.
pub type OnEvent = Box<dyn Fn(RunnerEvent) + Send + Sync>;

/// Polled once per chunk; returning `false` interrupts the run.
pub type ShouldContinue = Arc<dyn Fn() -> bool + Send + Sync>;

/// Adapt a cancellation token into a [`ShouldContinue`] predicate.
pub fn cancel_on(token: CancellationToken) -> ShouldContinue {
    Arc::new(move || !token.is_cancelled())
}

/// Deliver `event` to the observer. A panicking observer is logged and
/// otherwise ignored.
pub(crate) fn emit(on_event: Option<&OnEvent>, event: RunnerEvent) {
    let Some(callback) = on_event else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        warn!("event observer panicked; continuing run");
    }
}
