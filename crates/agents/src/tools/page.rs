//! Page tools: read content, query and interact with DOM elements, capture a
//! screenshot.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Value, json},
};

use crate::{
    tool_registry::{AgentTool, ToolContext, ToolProvider},
    tools::{browser_tool, optional_i64, required_str},
};

/// Characters of page text returned before truncation.
pub const MAX_PAGE_TEXT_CHARS: usize = 20_000;

const DEFAULT_QUERY_LIMIT: usize = 20;
const MAX_QUERY_LIMIT: usize = 100;

/// Registers the page tools when the context has a browser.
pub struct PageTools;

fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

fn tab_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = json!({
        "tabId": {"type": "integer", "description": "Target tab; defaults to the active tab"}
    });
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        props.extend(extra.clone());
    }
    json!({"type": "object", "properties": properties, "required": required})
}

#[async_trait]
impl ToolProvider for PageTools {
    fn name(&self) -> &str {
        "page"
    }

    async fn tools(&self, ctx: &Arc<ToolContext>) -> Result<Vec<Arc<dyn AgentTool>>> {
        let Some(browser) = ctx.browser.as_ref() else {
            return Ok(Vec::new());
        };

        Ok(vec![
            browser_tool(
                ctx,
                browser,
                "get_page_content",
                "Read page",
                "Return the title, URL and visible text of a tab.",
                tab_schema(json!({}), &[]),
                |browser, args| async move {
                    let page = browser.page_content(optional_i64(&args, "tabId")).await?;
                    let (text, truncated) = truncate_chars(&page.text, MAX_PAGE_TEXT_CHARS);
                    Ok(json!({
                        "tabId": page.tab_id,
                        "title": page.title,
                        "url": page.url,
                        "text": text,
                        "truncated": truncated,
                    }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "query_elements",
                "Find elements",
                "Find elements matching a CSS selector.",
                tab_schema(
                    json!({
                        "selector": {"type": "string", "description": "CSS selector"},
                        "limit": {"type": "integer", "description": "Maximum matches (default 20, max 100)"}
                    }),
                    &["selector"],
                ),
                |browser, args| async move {
                    let selector = required_str(&args, "selector")?;
                    let limit = args
                        .get("limit")
                        .and_then(Value::as_u64)
                        .map_or(DEFAULT_QUERY_LIMIT, |n| n as usize)
                        .clamp(1, MAX_QUERY_LIMIT);
                    let elements = browser
                        .query_elements(optional_i64(&args, "tabId"), selector, limit)
                        .await?;
                    Ok(json!({ "count": elements.len(), "elements": elements }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "click_element",
                "Click",
                "Click the first element matching a CSS selector.",
                tab_schema(json!({"selector": {"type": "string"}}), &["selector"]),
                |browser, args| async move {
                    let selector = required_str(&args, "selector")?;
                    browser.click(optional_i64(&args, "tabId"), selector).await?;
                    Ok(json!({ "clicked": selector }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "fill_input",
                "Fill input",
                "Set the value of the first input matching a CSS selector.",
                tab_schema(
                    json!({
                        "selector": {"type": "string"},
                        "value": {"type": "string"}
                    }),
                    &["selector", "value"],
                ),
                |browser, args| async move {
                    let selector = required_str(&args, "selector")?;
                    // An empty value clears the field, so it is not `required_str`.
                    let value = args
                        .get("value")
                        .and_then(Value::as_str)
                        .ok_or_else(|| anyhow::anyhow!("missing 'value' parameter"))?;
                    browser
                        .fill(optional_i64(&args, "tabId"), selector, value)
                        .await?;
                    Ok(json!({ "filled": selector }))
                },
            ),
            browser_tool(
                ctx,
                browser,
                "capture_screenshot",
                "Screenshot",
                "Capture the visible area of a tab as an image.",
                tab_schema(json!({}), &[]),
                |browser, args| async move {
                    let tab_id = optional_i64(&args, "tabId");
                    let shot = browser.capture_screenshot(tab_id).await?;
                    Ok(json!({
                        "tabId": tab_id,
                        "mimeType": shot.mime_type,
                        "base64": shot.base64,
                    }))
                },
            ),
        ])
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{multimodal::extract_image, tools::fake::FakeBrowser},
    };

    async fn tool(ctx: &Arc<ToolContext>, name: &str) -> Arc<dyn AgentTool> {
        PageTools
            .tools(ctx)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.name() == name)
            .unwrap()
    }

    fn context(browser: Arc<FakeBrowser>) -> Arc<ToolContext> {
        Arc::new(ToolContext::with_auto_run(true).browser(browser))
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate_chars("abc", 3), ("abc".to_string(), false));
    }

    #[test]
    fn tab_schema_merges_properties() {
        let schema = tab_schema(json!({"selector": {"type": "string"}}), &["selector"]);
        assert!(schema["properties"]["tabId"].is_object());
        assert!(schema["properties"]["selector"].is_object());
        assert_eq!(schema["required"], json!(["selector"]));
    }

    #[tokio::test]
    async fn reads_page_content() {
        let ctx = context(Arc::new(FakeBrowser::with_tabs(&[(
            3,
            "Rust",
            "https://rust-lang.org",
        )])));
        let page = tool(&ctx, "get_page_content")
            .await
            .execute(json!({}))
            .await
            .unwrap();
        assert_eq!(page["tabId"], 3);
        assert_eq!(page["text"], "content of Rust");
        assert_eq!(page["truncated"], false);
    }

    #[tokio::test]
    async fn query_limit_is_clamped() {
        let ctx = context(Arc::new(FakeBrowser::default()));
        let found = tool(&ctx, "query_elements")
            .await
            .execute(json!({"selector": "a", "limit": 0}))
            .await
            .unwrap();
        assert_eq!(found["count"], 1);
    }

    #[tokio::test]
    async fn click_and_fill_reach_the_browser() {
        let browser = Arc::new(FakeBrowser::default());
        let ctx = context(Arc::clone(&browser));

        tool(&ctx, "click_element")
            .await
            .execute(json!({"selector": "#go"}))
            .await
            .unwrap();
        tool(&ctx, "fill_input")
            .await
            .execute(json!({"selector": "#q", "value": ""}))
            .await
            .unwrap();
        let err = tool(&ctx, "fill_input")
            .await
            .execute(json!({"selector": "#q"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing 'value' parameter");

        assert_eq!(*browser.actions.lock().unwrap(), vec![
            "click #go".to_string(),
            "fill #q=".to_string(),
        ]);
    }

    #[tokio::test]
    async fn screenshot_result_carries_an_extractable_image() {
        let ctx = context(Arc::new(FakeBrowser::default()));
        let shot = tool(&ctx, "capture_screenshot")
            .await
            .execute(json!({"tabId": 5}))
            .await
            .unwrap();
        let (rest, image) = extract_image(shot);
        assert_eq!(image.unwrap().mime_type, "image/png");
        assert_eq!(rest, json!({"tabId": 5, "mimeType": "image/png"}));
    }
}
