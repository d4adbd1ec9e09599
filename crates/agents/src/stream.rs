//! One streaming request/response cycle against the model transport.

use {futures::StreamExt, tracing::debug};

use crate::{
    delta::{DeltaResult, compute_delta},
    events::{OnEvent, RunnerEvent, ShouldContinue, emit},
    model::{FunctionCall, GenerateRequest, ModelTransport, StreamChunk},
    thoughts::ThoughtState,
};

/// Accumulator for one streaming turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    /// Visible answer text so far.
    pub text: String,
    pub thoughts: ThoughtState,
}

impl StreamState {
    /// Fold one chunk's text and thoughts into the state, notifying the
    /// observer of what changed.
    pub fn apply_chunk(&mut self, chunk: &StreamChunk, on_event: Option<&OnEvent>) {
        let DeltaResult { delta, full } = compute_delta(&self.text, chunk.text.as_deref());
        if let Some(delta) = delta.filter(|d| !d.is_empty()) {
            emit(on_event, RunnerEvent::TextDelta(delta));
        }
        if full != self.text {
            self.text = full;
            emit(on_event, RunnerEvent::TextUpdate(self.text.clone()));
        }

        if let Some(delta) = self.thoughts.apply(&chunk.parts) {
            emit(on_event, RunnerEvent::ThinkingDelta(delta));
            emit(
                on_event,
                RunnerEvent::ThinkingUpdate(self.thoughts.full.clone()),
            );
        }
    }
}

/// How a streaming turn ended.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The caller asked to stop before the stream was exhausted.
    pub interrupted: bool,
    /// The latest non-empty function-call list seen in the turn.
    pub function_calls: Vec<FunctionCall>,
    pub state: StreamState,
}

/// Drive one streaming generation to completion or interruption.
///
/// `should_continue` is polled once per received chunk, before the chunk is
/// processed. Transport errors propagate.
pub async fn stream_once(
    transport: &dyn ModelTransport,
    request: GenerateRequest,
    on_event: Option<&OnEvent>,
    should_continue: Option<&ShouldContinue>,
) -> anyhow::Result<TurnOutcome> {
    let mut stream = transport.stream_generate(request);
    let mut state = StreamState::default();
    let mut function_calls = Vec::new();
    let mut chunks = 0usize;

    while let Some(item) = stream.next().await {
        if should_continue.is_some_and(|keep_going| !keep_going()) {
            debug!(
                transport = transport.name(),
                chunks, "stream interrupted by caller"
            );
            return Ok(TurnOutcome {
                interrupted: true,
                function_calls,
                state,
            });
        }

        let chunk = item?;
        chunks += 1;
        state.apply_chunk(&chunk, on_event);
        if !chunk.function_calls.is_empty() {
            function_calls = chunk.function_calls;
        }
    }

    debug!(
        transport = transport.name(),
        chunks,
        text_len = state.text.len(),
        calls = function_calls.len(),
        "stream turn finished"
    );
    Ok(TurnOutcome {
        interrupted: false,
        function_calls,
        state,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            model::{ChunkPart, GenerateConfig},
            testing::ScriptedTransport,
        },
        serde_json::json,
        std::sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "test-model".into(),
            contents: vec![],
            config: GenerateConfig::default(),
        }
    }

    fn recorder() -> (OnEvent, Arc<Mutex<Vec<RunnerEvent>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (
            Box::new(move |e| sink.lock().unwrap().push(e)),
            log,
        )
    }

    #[tokio::test]
    async fn snapshots_and_fragments_become_deltas() {
        let transport = ScriptedTransport::new(vec![vec![
            StreamChunk::text("Hel"),
            StreamChunk::text("Hello"),
            StreamChunk::text(""),
            StreamChunk::text(", world"),
        ]]);
        let (on_event, log) = recorder();

        let outcome = stream_once(&transport, request(), Some(&on_event), None)
            .await
            .unwrap();
        assert!(!outcome.interrupted);
        assert_eq!(outcome.state.text, "Hello, world");

        let deltas: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::TextDelta(d) => Some(d.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hel", "lo", ", world"]);
    }

    #[tokio::test]
    async fn thinking_updates_carry_full_transcript() {
        let transport = ScriptedTransport::new(vec![vec![
            StreamChunk {
                parts: vec![ChunkPart::thought("Look", None)],
                ..Default::default()
            },
            StreamChunk {
                parts: vec![ChunkPart::thought("Looking closer", None)],
                ..Default::default()
            },
        ]]);
        let (on_event, log) = recorder();

        let outcome = stream_once(&transport, request(), Some(&on_event), None)
            .await
            .unwrap();
        assert_eq!(outcome.state.thoughts.full, "Looking closer");

        let updates: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::ThinkingUpdate(full) => Some(full.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(updates, vec!["Look", "Looking closer"]);
    }

    #[tokio::test]
    async fn latest_non_empty_call_list_wins() {
        let transport = ScriptedTransport::new(vec![vec![
            StreamChunk::calls(vec![FunctionCall::new("a", json!({}))]),
            StreamChunk::text("thinking about it"),
            StreamChunk::calls(vec![
                FunctionCall::new("b", json!({"x": 1})),
                FunctionCall::new("c", json!({})),
            ]),
            StreamChunk::calls(vec![]),
        ]]);

        let outcome = stream_once(&transport, request(), None, None)
            .await
            .unwrap();
        let names: Vec<_> = outcome
            .function_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn cancellation_at_third_chunk_keeps_only_earlier_text() {
        let transport = ScriptedTransport::new(vec![vec![
            StreamChunk::text("a"),
            StreamChunk::text("ab"),
            StreamChunk::text("abc"),
            StreamChunk::text("abcd"),
            StreamChunk::text("abcde"),
        ]]);
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let should_continue: ShouldContinue =
            Arc::new(move || counter.fetch_add(1, Ordering::SeqCst) < 2);

        let outcome = stream_once(&transport, request(), None, Some(&should_continue))
            .await
            .unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.state.text, "ab");
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let transport = ScriptedTransport::failing("HTTP 500: upstream exploded");
        let err = stream_once(&transport, request(), None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream exploded"));
    }
}
