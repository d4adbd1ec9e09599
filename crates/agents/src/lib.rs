//! Agent runtime: streaming turns, thought aggregation, tool dispatch and the
//! tool streaming loop, plus the built-in browser, task and MCP tools.

pub mod chat;
pub mod delta;
pub mod events;
pub mod history;
pub mod model;
pub mod multimodal;
pub mod providers;
pub mod runner;
pub mod stream;
pub mod thoughts;
pub mod tool_registry;
pub mod tool_runner;
pub mod tools;

#[cfg(test)]
mod testing;

pub use {
    chat::{GenerateOptions, UserTurn, run_chat},
    events::{OnEvent, RunnerEvent, ShouldContinue, ToolEvent, cancel_on},
    model::{Content, ModelTransport, Part, StreamChunk},
    runner::{
        AgentRunError, ConfigProvider, LoopStatus, ToolLoopOptions, ToolLoopResult,
        run_tool_streaming_loop,
    },
    tool_registry::{
        AgentTool, ToolContext, ToolDefinition, ToolProvider, ToolRegistry, ToolRegistryBuilder,
    },
};
