use {
    async_trait::async_trait,
    tracing::{debug, info, trace, warn},
};

use crate::{
    events::{OnEvent, RunnerEvent, ShouldContinue, ToolEvent, emit},
    model::{Content, FunctionCall, GenerateConfig, GenerateRequest, ModelTransport, Part},
    stream::stream_once,
    tool_registry::ToolRegistry,
    tool_runner::{dedupe_calls, run_tool_call},
};

/// Fallback loop limit when config is missing or invalid.
pub const DEFAULT_AGENT_MAX_ITERATIONS: usize = 25;

fn resolve_agent_max_iterations(configured: usize) -> usize {
    if configured == 0 {
        warn!(
            default = DEFAULT_AGENT_MAX_ITERATIONS,
            "chat.max_iterations was 0; falling back to default"
        );
        return DEFAULT_AGENT_MAX_ITERATIONS;
    }
    configured
}

/// Error patterns that indicate the context window has been exceeded.
const CONTEXT_WINDOW_PATTERNS: &[&str] = &[
    "context_length_exceeded",
    "too many tokens",
    "request too large",
    "maximum context length",
    "context window",
    "token limit",
    "input token count",
    "exceeds the maximum number of tokens",
];

/// Check if an error message indicates a context window overflow.
fn is_context_window_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    CONTEXT_WINDOW_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Typed errors from the agent loop.
#[derive(Debug, thiserror::Error)]
pub enum AgentRunError {
    /// The provider reported that the context window / token limit was exceeded.
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),
    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentRunError {
    fn from_turn(err: anyhow::Error) -> Self {
        let msg = format!("{err:#}");
        if is_context_window_error(&msg) {
            Self::ContextWindowExceeded(msg)
        } else {
            Self::Other(err)
        }
    }
}

/// Supplies the base generation config, once per loop iteration.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn config(&self) -> anyhow::Result<GenerateConfig>;
}

#[async_trait]
impl ConfigProvider for GenerateConfig {
    async fn config(&self) -> anyhow::Result<GenerateConfig> {
        Ok(self.clone())
    }
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    /// The model stopped requesting tools.
    Completed,
    /// The caller's `should_continue` predicate returned `false` mid-turn.
    Interrupted,
    /// The iteration cap was reached while the model still wanted tools.
    Exhausted,
}

/// Result of running the tool streaming loop.
#[derive(Debug, Clone)]
pub struct ToolLoopResult {
    /// Answer text of the final streaming turn.
    pub text: String,
    /// Thinking transcript of the final streaming turn.
    pub thinking: String,
    /// Every tool event of the run, in execution order.
    pub events: Vec<ToolEvent>,
    pub status: LoopStatus,
    /// Streaming turns performed.
    pub iterations: usize,
    /// The conversation as it stands after the run.
    pub contents: Vec<Content>,
}

/// Knobs for one run of the loop.
pub struct ToolLoopOptions {
    pub on_event: Option<OnEvent>,
    pub should_continue: Option<ShouldContinue>,
    /// Tool batches the loop may dispatch. A model that still asks for tools
    /// after this many batches ends the run as [`LoopStatus::Exhausted`].
    /// 0 falls back to [`DEFAULT_AGENT_MAX_ITERATIONS`].
    pub max_iterations: usize,
}

impl Default for ToolLoopOptions {
    fn default() -> Self {
        Self {
            on_event: None,
            should_continue: None,
            max_iterations: DEFAULT_AGENT_MAX_ITERATIONS,
        }
    }
}

/// The model's own turn, echoed into the conversation ahead of the function
/// responses it asked for.
fn model_turn(text: &str, calls: &[FunctionCall]) -> Content {
    let mut parts = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        parts.push(Part::text(text));
    }
    parts.extend(calls.iter().cloned().map(Part::FunctionCall));
    Content::model(parts)
}

/// Alternate streaming turns and tool dispatch until the model stops asking
/// for tools, the caller interrupts, or the iteration cap is hit.
///
/// Tool failures are fed back to the model; only transport and config errors
/// end the run with `Err`.
pub async fn run_tool_streaming_loop(
    transport: &dyn ModelTransport,
    model: &str,
    mut contents: Vec<Content>,
    config_provider: &dyn ConfigProvider,
    tools: &ToolRegistry,
    options: &ToolLoopOptions,
) -> Result<ToolLoopResult, AgentRunError> {
    let max_iterations = resolve_agent_max_iterations(options.max_iterations);
    let on_event = options.on_event.as_ref();
    let declarations = tools.declarations();
    let mut events: Vec<ToolEvent> = Vec::new();
    let mut iterations = 0usize;
    let mut tool_rounds = 0usize;

    info!(
        transport = transport.name(),
        model,
        tools = declarations.len(),
        messages = contents.len(),
        max_iterations,
        "starting tool streaming loop"
    );

    loop {
        iterations += 1;
        emit(on_event, RunnerEvent::Iteration(iterations));

        let mut config = config_provider.config().await?;
        config.tools.extend(declarations.iter().cloned());
        let request = GenerateRequest {
            model: model.to_string(),
            contents: contents.clone(),
            config,
        };
        trace!(
            request = %serde_json::to_string(&request).unwrap_or_default(),
            "generate request"
        );

        let turn = stream_once(
            transport,
            request,
            on_event,
            options.should_continue.as_ref(),
        )
        .await
        .map_err(AgentRunError::from_turn)?;

        let finish = |status: LoopStatus, contents: Vec<Content>| ToolLoopResult {
            text: turn.state.text.clone(),
            thinking: turn.state.thoughts.full.clone(),
            events: events.clone(),
            status,
            iterations,
            contents,
        };

        if turn.interrupted {
            info!(iterations, "tool loop interrupted");
            return Ok(finish(LoopStatus::Interrupted, contents));
        }

        let calls = dedupe_calls(turn.function_calls.clone());
        if calls.is_empty() {
            info!(iterations, tool_calls = events.len(), "tool loop completed");
            if !turn.state.text.is_empty() {
                contents.push(Content::model(vec![Part::text(&turn.state.text)]));
            }
            return Ok(finish(LoopStatus::Completed, contents));
        }

        if tool_rounds >= max_iterations {
            warn!(
                max_iterations,
                tool_rounds,
                pending_calls = calls.len(),
                "tool loop hit iteration cap; dropping requested calls"
            );
            return Ok(finish(LoopStatus::Exhausted, contents));
        }

        debug!(iterations, calls = calls.len(), "dispatching tool calls");
        contents.push(model_turn(&turn.state.text, &calls));

        let mut responses = Vec::new();
        for call in calls {
            let outcome = run_tool_call(tools, call, on_event).await;
            events.push(outcome.event);
            responses.extend(outcome.parts);
        }
        contents.push(Content::user(responses));
        tool_rounds += 1;
    }
}
