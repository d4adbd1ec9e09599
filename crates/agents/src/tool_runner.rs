//! Dispatch of one turn's requested tool calls.

use std::{any::Any, panic::AssertUnwindSafe, time::Instant};

use {
    futures::FutureExt,
    serde_json::{Value, json},
    tracing::{debug, info, warn},
};

use crate::{
    events::{OnEvent, RunnerEvent, ToolEvent, emit},
    model::{FunctionCall, Part},
    multimodal::extract_image,
    tool_registry::ToolRegistry,
};

/// Error reported for calls naming a tool that is not registered.
pub const UNKNOWN_TOOL: &str = "Unknown tool";

/// Outcome of one dispatched call.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    /// The finalized event.
    pub event: ToolEvent,
    /// Function response for the model, plus an inline image if the result
    /// carried one.
    pub parts: Vec<Part>,
}

/// Drop repeated calls within one turn.
///
/// Two calls are duplicates when both the name and the arguments are equal
/// (structurally, so key order does not matter). The first occurrence wins,
/// though it inherits a duplicate's signature when it has none of its own.
pub fn dedupe_calls(calls: Vec<FunctionCall>) -> Vec<FunctionCall> {
    let mut kept: Vec<FunctionCall> = Vec::with_capacity(calls.len());
    for call in calls {
        if let Some(first) = kept
            .iter_mut()
            .find(|k| k.name == call.name && k.args == call.args)
        {
            debug!(tool = %call.name, "dropping duplicate tool call");
            if first.thought_signature.is_none() {
                first.thought_signature = call.thought_signature;
            }
            continue;
        }
        kept.push(call);
    }
    kept
}

/// Arguments sent as a JSON string are parsed; unparsable strings pass
/// through unchanged. Missing arguments become an empty object.
fn normalize_args(args: Value) -> Value {
    match args {
        Value::Null => json!({}),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "tool arguments are not JSON; passing raw string");
                Value::String(raw)
            },
        },
        other => other,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}

fn failure(mut event: ToolEvent, error: String) -> ToolCallOutcome {
    let response = json!({ "ok": false, "error": error });
    let part = Part::function_response(&event.name, response);
    event.error = Some(error);
    ToolCallOutcome {
        event,
        parts: vec![part],
    }
}

/// Execute one call. Never fails: unknown tools, handler errors and panics
/// all become a failed [`ToolEvent`] plus an `{ok: false}` response.
pub async fn run_tool_call(
    tools: &ToolRegistry,
    call: FunctionCall,
    on_event: Option<&OnEvent>,
) -> ToolCallOutcome {
    let tool = tools.get(&call.name);
    let args = normalize_args(call.args);
    let event = ToolEvent::pending(
        call.name,
        tool.and_then(|t| t.display_name()).map(String::from),
        args.clone(),
    );
    emit(on_event, RunnerEvent::ToolCallStart(event.clone()));

    let Some(tool) = tool else {
        warn!(tool = %event.name, "model requested unknown tool");
        let outcome = failure(event, UNKNOWN_TOOL.to_string());
        emit(on_event, RunnerEvent::ToolCallEnd(outcome.event.clone()));
        return outcome;
    };

    info!(tool = %event.name, args = %args, "executing tool");
    let started = Instant::now();
    let result = AssertUnwindSafe(tool.execute(args)).catch_unwind().await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let outcome = match result {
        Ok(Ok(value)) => {
            debug!(tool = %event.name, elapsed_ms, "tool succeeded");
            let (sanitized, image) = extract_image(value.clone());
            let mut parts = vec![Part::function_response(
                &event.name,
                json!({ "ok": true, "result": sanitized }),
            )];
            if let Some(image) = image {
                parts.push(Part::InlineData(image));
            }
            let mut event = event;
            event.result = Some(value);
            ToolCallOutcome { event, parts }
        },
        Ok(Err(e)) => {
            let error = format!("{e:#}");
            warn!(tool = %event.name, elapsed_ms, error = %error, "tool failed");
            failure(event, error)
        },
        Err(payload) => {
            let error = panic_message(payload.as_ref());
            warn!(tool = %event.name, elapsed_ms, error = %error, "tool panicked");
            failure(event, error)
        },
    };

    emit(on_event, RunnerEvent::ToolCallEnd(outcome.event.clone()));
    outcome
}
