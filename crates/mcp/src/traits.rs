//! Client abstraction over a remote MCP server.
//!
//! The agent crate only talks to this trait, so tests can script a server
//! in memory and alternative transports can be swapped in.

use {async_trait::async_trait, serde_json::Value, tracing::warn};

use crate::{
    error::Result,
    types::{McpToolDef, ToolsCallResult, ToolsListResult},
};

/// Upper bound on `tools/list` pages drained by [`list_all_tools`].
pub const MAX_TOOL_PAGES: usize = 64;

#[async_trait]
pub trait McpClient: Send + Sync {
    /// The display name of the connected server.
    fn server_name(&self) -> &str;

    /// Fetch one page of tools. `cursor` is `None` for the first page.
    async fn list_tools_page(&self, cursor: Option<&str>) -> Result<ToolsListResult>;

    /// Call a tool on the server.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    /// Tear down the connection. Calling it twice is harmless.
    async fn close(&self);
}

/// Drain every `tools/list` page into one list.
///
/// Stops on an empty or repeated cursor, or after [`MAX_TOOL_PAGES`] pages.
pub async fn list_all_tools(client: &dyn McpClient) -> Result<Vec<McpToolDef>> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_TOOL_PAGES {
        let page = client.list_tools_page(cursor.as_deref()).await?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next);
            },
            _ => return Ok(tools),
        }
    }

    warn!(
        server = %client.server_name(),
        pages = MAX_TOOL_PAGES,
        "MCP tools/list pagination did not terminate; using tools fetched so far"
    );
    Ok(tools)
}
