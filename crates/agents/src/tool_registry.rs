use std::{collections::HashMap, future::Future, sync::Arc};

use {
    anyhow::Result,
    async_trait::async_trait,
    futures::{FutureExt, future::BoxFuture},
    serde_json::Value,
    tabpilot_mcp::McpClient,
    tracing::{debug, warn},
};

use crate::{
    model::FunctionDeclaration,
    tools::{BrowserClient, TaskListClient},
};

/// Agent-callable tool.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;
    /// Human label for timelines; `None` falls back to the name.
    fn display_name(&self) -> Option<&str> {
        None
    }
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value) -> Result<Value>;
}

/// Async handler behind a [`ToolDefinition`].
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A tool assembled from a schema and a handler closure.
pub struct ToolDefinition {
    pub name: String,
    pub display_name: Option<String>,
    pub description: String,
    pub parameters: Value,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: description.into(),
            parameters,
            handler,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

#[async_trait]
impl AgentTool for ToolDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        (self.handler)(params).await
    }
}

/// Registry of available tools for an agent run.
///
/// Tools are stored as `Arc<dyn AgentTool>` so registries can be merged and
/// cloned cheaply.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, returning the one it replaced, if any.
    pub fn register(&mut self, tool: Box<dyn AgentTool>) -> Option<Arc<dyn AgentTool>> {
        self.register_arc(Arc::from(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn AgentTool>) -> Option<Arc<dyn AgentTool>> {
        let name = tool.name().to_string();
        self.tools.insert(name, tool)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&dyn AgentTool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Function declarations for every tool, sorted by name so requests are
    /// stable across runs.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut decls: Vec<FunctionDeclaration> = self
            .tools
            .values()
            .map(|t| FunctionDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }
}

// ── Shared tool context ─────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Tool execution is switched off in settings.
    #[error("Tool execution is disabled. Enable auto-run in settings to allow tools.")]
    AccessDenied,
}

/// Whether tools may run right now. Consulted on every call, so toggling the
/// setting mid-run takes effect on the next tool.
pub type ToolGuard = Arc<dyn Fn() -> bool + Send + Sync>;

/// What providers get to build their tools from.
pub struct ToolContext {
    can_run: ToolGuard,
    pub browser: Option<Arc<dyn BrowserClient>>,
    pub tasks: Option<Arc<dyn TaskListClient>>,
    pub mcp_clients: Vec<Arc<dyn McpClient>>,
}

impl ToolContext {
    pub fn new(can_run: ToolGuard) -> Self {
        Self {
            can_run,
            browser: None,
            tasks: None,
            mcp_clients: Vec::new(),
        }
    }

    /// Context whose guard reflects a fixed auto-run setting.
    pub fn with_auto_run(auto_run: bool) -> Self {
        Self::new(Arc::new(move || auto_run))
    }

    #[must_use]
    pub fn browser(mut self, browser: Arc<dyn BrowserClient>) -> Self {
        self.browser = Some(browser);
        self
    }

    #[must_use]
    pub fn tasks(mut self, tasks: Arc<dyn TaskListClient>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    #[must_use]
    pub fn mcp_client(mut self, client: Arc<dyn McpClient>) -> Self {
        self.mcp_clients.push(client);
        self
    }

    /// The guard itself, for tools that check it on their own.
    pub fn guard(&self) -> ToolGuard {
        Arc::clone(&self.can_run)
    }

    /// Fails with [`ToolError::AccessDenied`] when tool execution is disabled.
    pub fn ensure_can_run(&self) -> std::result::Result<(), ToolError> {
        if (self.can_run)() {
            Ok(())
        } else {
            Err(ToolError::AccessDenied)
        }
    }

    /// Close every MCP client. Safe to call more than once.
    pub async fn close_mcp_clients(&self) {
        for client in &self.mcp_clients {
            client.close().await;
        }
    }
}

/// Box an async closure into a [`ToolHandler`].
pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Like [`tool_handler`], but checks the context guard before running `f`.
pub fn guarded<F, Fut>(ctx: &Arc<ToolContext>, f: F) -> ToolHandler
where
    F: Fn(Arc<ToolContext>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    let f = Arc::new(f);
    tool_handler(move |args| {
        let ctx = Arc::clone(&ctx);
        let f = Arc::clone(&f);
        async move {
            ctx.ensure_can_run()?;
            (*f)(ctx, args).await
        }
    })
}

// ── Registry composition ────────────────────────────────────────────────────

/// Produces one slice of the registry from the shared context.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn tools(&self, ctx: &Arc<ToolContext>) -> Result<Vec<Arc<dyn AgentTool>>>;
}

/// Ordered composition of tool providers.
///
/// Slices are merged in registration order and the merge is right-biased: on
/// a name collision the later provider's tool wins.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    providers: Vec<Box<dyn ToolProvider>>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tabs, page, tasks, then MCP tools.
    pub fn with_defaults() -> Self {
        Self::new()
            .provider(crate::tools::tabs::TabTools)
            .provider(crate::tools::page::PageTools)
            .provider(crate::tools::tasks::TaskTools)
            .provider(crate::tools::mcp::McpTools)
    }

    #[must_use]
    pub fn provider(mut self, provider: impl ToolProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Build the registry. A provider that fails is logged and skipped.
    pub async fn build(&self, ctx: &Arc<ToolContext>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for provider in &self.providers {
            let tools = match provider.tools(ctx).await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "tool provider failed; skipping");
                    continue;
                },
            };
            debug!(
                provider = provider.name(),
                count = tools.len(),
                "registering tools"
            );
            for tool in tools {
                if let Some(replaced) = registry.register_arc(tool) {
                    warn!(
                        tool = replaced.name(),
                        provider = provider.name(),
                        "tool name collision; later provider wins"
                    );
                }
            }
        }
        registry
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn echo(name: &str, description: &str) -> Arc<dyn AgentTool> {
        Arc::new(ToolDefinition::new(
            name,
            description,
            json!({"type": "object"}),
            tool_handler(|args| async move { Ok(args) }),
        ))
    }

    struct Fixed {
        name: &'static str,
        tools: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl ToolProvider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn tools(&self, _ctx: &Arc<ToolContext>) -> Result<Vec<Arc<dyn AgentTool>>> {
            Ok(self.tools.iter().map(|(n, d)| echo(n, d)).collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolProvider for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn tools(&self, _ctx: &Arc<ToolContext>) -> Result<Vec<Arc<dyn AgentTool>>> {
            anyhow::bail!("discovery failed")
        }
    }

    #[tokio::test]
    async fn later_provider_wins_on_collision() {
        let ctx = Arc::new(ToolContext::with_auto_run(true));
        let registry = ToolRegistryBuilder::new()
            .provider(Fixed {
                name: "first",
                tools: vec![("shared", "from first"), ("only_first", "a")],
            })
            .provider(Broken)
            .provider(Fixed {
                name: "second",
                tools: vec![("shared", "from second")],
            })
            .build(&ctx)
            .await;

        assert_eq!(registry.tool_names(), vec!["only_first", "shared"]);
        assert_eq!(registry.get("shared").unwrap().description(), "from second");
    }

    #[test]
    fn declarations_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register_arc(echo("zeta", "z"));
        registry.register_arc(echo("alpha", "a"));
        let names: Vec<_> = registry
            .declarations()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn register_returns_replaced_tool() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register_arc(echo("t", "old")).is_none());
        let replaced = registry.register_arc(echo("t", "new")).unwrap();
        assert_eq!(replaced.description(), "old");
        assert!(registry.unregister("t"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn guarded_handler_fails_closed() {
        let ctx = Arc::new(ToolContext::with_auto_run(false));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = guarded(&ctx, move |_ctx, _args| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(json!("ran")) }
        });

        let err = handler(json!({})).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolError>(),
            Some(ToolError::AccessDenied)
        ));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn guarded_handler_runs_when_allowed() {
        let ctx = Arc::new(ToolContext::with_auto_run(true));
        let handler = guarded(&ctx, |_ctx, args| async move { Ok(args) });
        assert_eq!(handler(json!({"a": 1})).await.unwrap(), json!({"a": 1}));
    }
}
