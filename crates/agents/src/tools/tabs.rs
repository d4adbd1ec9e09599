//! Tab management tools: list, open, switch, close and navigate.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Value, json},
};

use crate::{
    tool_registry::{AgentTool, ToolContext, ToolProvider},
    tools::{browser_tool, optional_i64, required_i64, required_str, validate_url},
};

/// Registers the tab tools when the context has a browser.
pub struct TabTools;

#[async_trait]
impl ToolProvider for TabTools {
    fn name(&self) -> &str {
        "tabs"
    }

    async fn tools(&self, ctx: &Arc<ToolContext>) -> Result<Vec<Arc<dyn AgentTool>>> {
        let Some(browser) = ctx.browser.as_ref() else {
            return Ok(Vec::new());
        };

        Ok(vec![
            browser_tool(
                ctx,
                browser,
                "list_tabs",
                "List tabs",
                "List the open browser tabs with their id, title, URL and whether they are active.",
                json!({"type": "object", "properties": {}}),
                |browser, _args| async move {
                    let tabs = browser.list_tabs().await?;
                    Ok(json!({ "tabs": tabs }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "open_tab",
                "Open tab",
                "Open a URL in a new tab.",
                json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string", "description": "http(s) URL to open"},
                        "active": {"type": "boolean", "description": "Focus the new tab (default true)"}
                    },
                    "required": ["url"]
                }),
                |browser, args| async move {
                    let url = validate_url(required_str(&args, "url")?)?;
                    let active = args.get("active").and_then(Value::as_bool).unwrap_or(true);
                    let tab = browser.open_tab(url, active).await?;
                    Ok(json!({ "tab": tab }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "switch_tab",
                "Switch tab",
                "Make the tab with the given id the active tab.",
                json!({
                    "type": "object",
                    "properties": {"tabId": {"type": "integer"}},
                    "required": ["tabId"]
                }),
                |browser, args| async move {
                    let tab = browser.switch_tab(required_i64(&args, "tabId")?).await?;
                    Ok(json!({ "tab": tab }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "close_tab",
                "Close tab",
                "Close the tab with the given id.",
                json!({
                    "type": "object",
                    "properties": {"tabId": {"type": "integer"}},
                    "required": ["tabId"]
                }),
                |browser, args| async move {
                    let tab_id = required_i64(&args, "tabId")?;
                    browser.close_tab(tab_id).await?;
                    Ok(json!({ "closed": tab_id }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "navigate",
                "Navigate",
                "Load a URL in a tab. Without tabId the active tab is used.",
                json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string"},
                        "tabId": {"type": "integer"}
                    },
                    "required": ["url"]
                }),
                |browser, args| async move {
                    let url = validate_url(required_str(&args, "url")?)?;
                    let tab = browser.navigate(optional_i64(&args, "tabId"), url).await?;
                    Ok(json!({ "tab": tab }))
                },
            ),
        ])
    }
}
