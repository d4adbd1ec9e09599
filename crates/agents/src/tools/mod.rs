//! Built-in tool providers.
//!
//! Browser tools (tabs, page) delegate to a [`BrowserClient`]; task tools to a
//! [`TaskListClient`]; MCP tools to remote servers. A provider whose client is
//! absent from the [`ToolContext`](crate::tool_registry::ToolContext)
//! contributes nothing.

pub mod mcp;
pub mod page;
pub mod tabs;
pub mod tasks;

use std::{future::Future, sync::Arc};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::tool_registry::{AgentTool, ToolContext, ToolDefinition, guarded};

pub use tasks::{InMemoryTaskList, Task, TaskListClient, TaskStatus};

/// A browser tab as seen by the tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub active: bool,
}

/// Readable content of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub tab_id: i64,
    pub title: String,
    pub url: String,
    pub text: String,
}

/// A DOM element matched by a selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// A captured screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub base64: String,
}

/// Browser automation backend. `tab_id: None` targets the active tab.
#[async_trait]
pub trait BrowserClient: Send + Sync {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>>;
    async fn open_tab(&self, url: &str, active: bool) -> Result<TabInfo>;
    async fn switch_tab(&self, tab_id: i64) -> Result<TabInfo>;
    async fn close_tab(&self, tab_id: i64) -> Result<()>;
    async fn navigate(&self, tab_id: Option<i64>, url: &str) -> Result<TabInfo>;
    async fn page_content(&self, tab_id: Option<i64>) -> Result<PageContent>;
    async fn query_elements(
        &self,
        tab_id: Option<i64>,
        selector: &str,
        limit: usize,
    ) -> Result<Vec<ElementInfo>>;
    async fn click(&self, tab_id: Option<i64>, selector: &str) -> Result<()>;
    async fn fill(&self, tab_id: Option<i64>, selector: &str, value: &str) -> Result<()>;
    async fn capture_screenshot(&self, tab_id: Option<i64>) -> Result<Screenshot>;
}

/// Build a guarded tool whose handler receives the browser client.
pub(crate) fn browser_tool<F, Fut>(
    ctx: &Arc<ToolContext>,
    browser: &Arc<dyn BrowserClient>,
    name: &str,
    display_name: &str,
    description: &str,
    parameters: Value,
    f: F,
) -> Arc<dyn AgentTool>
where
    F: Fn(Arc<dyn BrowserClient>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let browser = Arc::clone(browser);
    let handler = guarded(ctx, move |_ctx, args| f(Arc::clone(&browser), args));
    Arc::new(
        ToolDefinition::new(name, description, parameters, handler).with_display_name(display_name),
    )
}

// ── Argument helpers ────────────────────────────────────────────────────────

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("missing '{key}' parameter"))
}

pub(crate) fn optional_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

pub(crate) fn required_i64(params: &Value, key: &str) -> Result<i64> {
    optional_i64(params, key).ok_or_else(|| anyhow!("missing '{key}' parameter"))
}

/// Only http(s) URLs may be opened by the model.
pub(crate) fn validate_url(url: &str) -> Result<&str> {
    let url = url.trim();
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(url)
    } else {
        Err(anyhow!("unsupported URL '{url}': only http and https are allowed"))
    }
}
