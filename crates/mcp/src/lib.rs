//! MCP (Model Context Protocol) client support for tabpilot.
//!
//! - JSON-RPC 2.0 over streamable HTTP (`http_transport`)
//! - Handshake and tool calls against one server (`client`)
//! - The [`McpClient`] seam the agent crate builds tools on (`traits`)

pub mod client;
pub mod error;
pub mod http_transport;
pub mod traits;
pub mod types;

pub use {
    client::HttpMcpClient,
    error::{Error, Result},
    traits::{MAX_TOOL_PAGES, McpClient, list_all_tools},
    types::{McpToolDef, ToolContent, ToolsCallResult, ToolsListResult},
};
