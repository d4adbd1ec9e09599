//! Bridge remote MCP tools into the registry.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Value, json},
    tabpilot_config::McpServerConfig,
    tabpilot_mcp::{HttpMcpClient, McpClient, McpToolDef, ToolContent, list_all_tools},
    tracing::{info, warn},
};

use crate::tool_registry::{AgentTool, ToolContext, ToolGuard, ToolProvider};

/// Model-facing name of an MCP tool: `mcp__<server>__<tool>`.
///
/// Characters outside `[A-Za-z0-9_-]` are replaced with `_` so the name is a
/// valid function identifier.
pub fn prefixed_tool_name(server: &str, tool: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("mcp__{}__{}", clean(server), clean(tool))
}

/// An [`AgentTool`] that delegates to a tool on an MCP server.
pub struct McpToolBridge {
    /// Prefixed tool name: `mcp__<server>__<tool>`.
    prefixed_name: String,
    /// Original tool name on the MCP server.
    original_name: String,
    description: String,
    input_schema: Value,
    client: Arc<dyn McpClient>,
    can_run: ToolGuard,
}

impl McpToolBridge {
    pub fn new(tool_def: &McpToolDef, client: Arc<dyn McpClient>, can_run: ToolGuard) -> Self {
        Self {
            prefixed_name: prefixed_tool_name(client.server_name(), &tool_def.name),
            original_name: tool_def.name.clone(),
            description: tool_def
                .description
                .clone()
                .unwrap_or_else(|| format!("MCP tool: {}", tool_def.name)),
            input_schema: tool_def.input_schema.clone(),
            client,
            can_run,
        }
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }
}

/// Collapse `tools/call` content into one JSON value.
///
/// A single text item is parsed as JSON when it is JSON; the first image is
/// surfaced as `{mimeType, base64}` so it can be shown to the model.
fn content_to_value(content: &[ToolContent]) -> Value {
    let texts: Vec<&str> = content
        .iter()
        .filter_map(|c| match c {
            ToolContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    let image = content.iter().find_map(|c| match c {
        ToolContent::Image { data, mime_type } => Some((mime_type, data)),
        _ => None,
    });

    match (texts.as_slice(), image) {
        ([], Some((mime_type, data))) => json!({ "mimeType": mime_type, "base64": data }),
        ([text], None) => serde_json::from_str(text).unwrap_or_else(|_| json!(text)),
        (texts, None) => json!({ "content": texts }),
        (texts, Some((mime_type, data))) => json!({
            "content": texts,
            "image": { "mimeType": mime_type, "base64": data },
        }),
    }
}

#[async_trait]
impl AgentTool for McpToolBridge {
    fn name(&self) -> &str {
        &self.prefixed_name
    }

    fn display_name(&self) -> Option<&str> {
        Some(&self.original_name)
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        if !(self.can_run)() {
            return Err(crate::tool_registry::ToolError::AccessDenied.into());
        }
        let result = self.client.call_tool(&self.original_name, params).await?;
        if result.is_error {
            anyhow::bail!("MCP tool error: {}", result.joined_text());
        }
        Ok(content_to_value(&result.content))
    }
}

/// Registers every tool of every MCP client in the context. A server whose
/// listing fails is skipped.
pub struct McpTools;

#[async_trait]
impl ToolProvider for McpTools {
    fn name(&self) -> &str {
        "mcp"
    }

    async fn tools(&self, ctx: &Arc<ToolContext>) -> Result<Vec<Arc<dyn AgentTool>>> {
        let mut tools: Vec<Arc<dyn AgentTool>> = Vec::new();
        for client in &ctx.mcp_clients {
            let defs = match list_all_tools(client.as_ref()).await {
                Ok(defs) => defs,
                Err(e) => {
                    warn!(server = %client.server_name(), error = %e, "failed to list MCP tools");
                    continue;
                },
            };
            info!(server = %client.server_name(), count = defs.len(), "discovered MCP tools");
            let guard = ctx.guard();
            tools.extend(defs.iter().map(|def| {
                Arc::new(McpToolBridge::new(def, Arc::clone(client), Arc::clone(&guard)))
                    as Arc<dyn AgentTool>
            }));
        }
        Ok(tools)
    }
}

/// Connect to every enabled server. Servers that fail to connect are logged
/// and left out.
pub async fn connect_mcp_servers(servers: &[McpServerConfig]) -> Vec<Arc<dyn McpClient>> {
    let mut clients: Vec<Arc<dyn McpClient>> = Vec::new();
    for server in servers.iter().filter(|s| s.enabled) {
        match HttpMcpClient::connect(&server.name, &server.url, server.headers.clone()).await {
            Ok(client) => clients.push(Arc::new(client)),
            Err(e) => warn!(server = %server.name, error = %e, "failed to connect MCP server"),
        }
    }
    clients
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::tool_registry::ToolError,
        std::sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
        tabpilot_mcp::{ToolsCallResult, ToolsListResult},
    };

    struct FakeServer {
        name: &'static str,
        fail_listing: bool,
        calls: Mutex<Vec<(String, Value)>>,
        result: ToolsCallResult,
        closed: AtomicBool,
    }

    impl FakeServer {
        fn new(name: &'static str, result: ToolsCallResult) -> Self {
            Self {
                name,
                fail_listing: false,
                calls: Mutex::new(Vec::new()),
                result,
                closed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl McpClient for FakeServer {
        fn server_name(&self) -> &str {
            self.name
        }

        async fn list_tools_page(
            &self,
            cursor: Option<&str>,
        ) -> tabpilot_mcp::Result<ToolsListResult> {
            if self.fail_listing {
                return Err(tabpilot_mcp::Error::message("listing failed"));
            }
            let (name, next) = match cursor {
                None => ("search", Some("p2".to_string())),
                Some(_) => ("fetch", None),
            };
            Ok(ToolsListResult {
                tools: vec![McpToolDef {
                    name: name.into(),
                    description: None,
                    input_schema: json!({"type": "object"}),
                }],
                next_cursor: next,
            })
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Value,
        ) -> tabpilot_mcp::Result<ToolsCallResult> {
            self.calls.lock().unwrap().push((name.into(), arguments));
            Ok(self.result.clone())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn text_result(text: &str, is_error: bool) -> ToolsCallResult {
        ToolsCallResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error,
        }
    }

    #[test]
    fn prefixed_names_are_sanitized() {
        assert_eq!(
            prefixed_tool_name("filesystem", "read_file"),
            "mcp__filesystem__read_file"
        );
        assert_eq!(
            prefixed_tool_name("my server", "a.b"),
            "mcp__my_server__a_b"
        );
        let name = prefixed_tool_name("my-server", "read_file");
        let parts: Vec<&str> = name.splitn(3, "__").collect();
        assert_eq!(parts, vec!["mcp", "my-server", "read_file"]);
    }

    #[test]
    fn content_collapses_to_json() {
        assert_eq!(
            content_to_value(&[ToolContent::Text {
                text: r#"{"hits": 2}"#.into()
            }]),
            json!({"hits": 2})
        );
        assert_eq!(
            content_to_value(&[ToolContent::Text {
                text: "plain".into()
            }]),
            json!("plain")
        );
        assert_eq!(
            content_to_value(&[ToolContent::Image {
                data: "AAAA".into(),
                mime_type: "image/png".into()
            }]),
            json!({"mimeType": "image/png", "base64": "AAAA"})
        );
    }

    #[tokio::test]
    async fn provider_drains_pages_and_skips_failing_servers() {
        let good: Arc<dyn McpClient> = Arc::new(FakeServer::new("docs", text_result("ok", false)));
        let bad: Arc<dyn McpClient> = Arc::new(FakeServer {
            fail_listing: true,
            ..FakeServer::new("broken", text_result("", false))
        });
        let ctx = Arc::new(
            ToolContext::with_auto_run(true)
                .mcp_client(bad)
                .mcp_client(good),
        );

        let mut names: Vec<String> = McpTools
            .tools(&ctx)
            .await
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["mcp__docs__fetch", "mcp__docs__search"]);
    }

    #[tokio::test]
    async fn bridge_calls_original_name() {
        let server = Arc::new(FakeServer::new("docs", text_result(r#"[1, 2]"#, false)));
        let bridge = McpToolBridge::new(
            &McpToolDef {
                name: "search".into(),
                description: Some("Search docs".into()),
                input_schema: json!({"type": "object"}),
            },
            server.clone(),
            Arc::new(|| true),
        );

        assert_eq!(bridge.name(), "mcp__docs__search");
        assert_eq!(bridge.display_name(), Some("search"));
        let value = bridge.execute(json!({"q": "serde"})).await.unwrap();
        assert_eq!(value, json!([1, 2]));
        assert_eq!(*server.calls.lock().unwrap(), vec![(
            "search".to_string(),
            json!({"q": "serde"})
        )]);
    }

    #[tokio::test]
    async fn bridge_surfaces_server_errors() {
        let server = Arc::new(FakeServer::new("docs", text_result("rate limited", true)));
        let def = McpToolDef {
            name: "search".into(),
            description: None,
            input_schema: json!({}),
        };
        let bridge = McpToolBridge::new(&def, server, Arc::new(|| true));
        let err = bridge.execute(json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "MCP tool error: rate limited");
        assert_eq!(bridge.description(), "MCP tool: search");
    }

    #[tokio::test]
    async fn bridge_respects_the_guard() {
        let server = Arc::new(FakeServer::new("docs", text_result("ok", false)));
        let def = McpToolDef {
            name: "search".into(),
            description: None,
            input_schema: json!({}),
        };
        let bridge = McpToolBridge::new(&def, server.clone(), Arc::new(|| false));
        let err = bridge.execute(json!({})).await.unwrap_err();
        assert!(err.downcast_ref::<ToolError>().is_some());
        assert!(server.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_reaches_every_client() {
        let a = Arc::new(FakeServer::new("a", text_result("", false)));
        let b = Arc::new(FakeServer::new("b", text_result("", false)));
        let ctx = ToolContext::with_auto_run(true)
            .mcp_client(a.clone())
            .mcp_client(b.clone());
        ctx.close_mcp_clients().await;
        assert!(a.closed.load(Ordering::SeqCst));
        assert!(b.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn disabled_servers_are_not_contacted() {
        let servers = vec![McpServerConfig {
            name: "off".into(),
            url: "http://127.0.0.1:1/mcp".into(),
            enabled: false,
            headers: Default::default(),
        }];
        assert!(connect_mcp_servers(&servers).await.is_empty());
    }
}
