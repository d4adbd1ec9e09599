//! One chat request end to end: registry, history, user turn, loop, cleanup.

use std::sync::Arc;

use {
    serde_json::Value,
    tabpilot_config::{ChatConfig, ChatSettings},
    tracing::{debug, info},
};

use crate::{
    events::{OnEvent, ShouldContinue},
    history::{Attachment, history_to_contents},
    model::{Content, GenerateConfig, ModelTransport, Part, ThinkingConfig},
    runner::{
        AgentRunError, ConfigProvider, ToolLoopOptions, ToolLoopResult, run_tool_streaming_loop,
    },
    tool_registry::{ToolContext, ToolRegistryBuilder},
    tools::tasks::TaskContextConfig,
};

/// Per-run configuration. Built once by the caller.
pub struct GenerateOptions {
    pub model: String,
    pub thinking_enabled: bool,
    pub thinking_budget: Option<i32>,
    pub system_prompt: Option<String>,
    pub max_iterations: usize,
    pub on_event: Option<OnEvent>,
    pub should_continue: Option<ShouldContinue>,
    /// Stored prior messages, see [`crate::history`].
    pub history: Vec<Value>,
    pub context: Arc<ToolContext>,
    pub tools: ToolRegistryBuilder,
}

impl GenerateOptions {
    pub fn new(model: impl Into<String>, context: ToolContext) -> Self {
        Self {
            model: model.into(),
            thinking_enabled: false,
            thinking_budget: None,
            system_prompt: None,
            max_iterations: 0,
            on_event: None,
            should_continue: None,
            history: Vec::new(),
            context: Arc::new(context),
            tools: ToolRegistryBuilder::with_defaults(),
        }
    }

    /// Options from the effective settings. `attach` adds clients to a context
    /// whose guard already reflects the auto-run setting.
    pub fn from_settings(
        settings: &ChatSettings,
        chat: &ChatConfig,
        attach: impl FnOnce(ToolContext) -> ToolContext,
    ) -> Self {
        let context = attach(ToolContext::with_auto_run(settings.auto_run_tools));
        Self {
            thinking_enabled: settings.thinking_enabled,
            thinking_budget: settings.thinking_budget,
            system_prompt: chat.system_prompt.clone(),
            max_iterations: chat.max_iterations,
            ..Self::new(settings.model.clone(), context)
        }
    }

    fn base_config(&self) -> GenerateConfig {
        GenerateConfig {
            system_instruction: self.system_prompt.clone().filter(|s| !s.trim().is_empty()),
            tools: Vec::new(),
            thinking: self.thinking_enabled.then(|| ThinkingConfig {
                include_thoughts: true,
                thinking_budget: self.thinking_budget,
            }),
        }
    }
}

/// The new user message.
#[derive(Debug, Clone, Default)]
pub struct UserTurn {
    pub message: String,
    pub attachments: Vec<Attachment>,
}

impl UserTurn {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attachments: Vec::new(),
        }
    }

    fn into_content(self) -> Option<Content> {
        let mut parts = Vec::with_capacity(1 + self.attachments.len());
        if !self.message.trim().is_empty() {
            parts.push(Part::text(self.message));
        }
        parts.extend(self.attachments.iter().filter_map(Attachment::to_part));
        (!parts.is_empty()).then(|| Content::user(parts))
    }
}

/// Run one chat request. MCP clients in the context are closed before this
/// returns, whether the run succeeded or not.
pub async fn run_chat(
    transport: &dyn ModelTransport,
    user: UserTurn,
    mut options: GenerateOptions,
) -> Result<ToolLoopResult, AgentRunError> {
    let loop_options = ToolLoopOptions {
        on_event: options.on_event.take(),
        should_continue: options.should_continue.clone(),
        max_iterations: options.max_iterations,
    };
    let result = run_with_context(transport, user, &options, &loop_options).await;
    options.context.close_mcp_clients().await;
    result
}

async fn run_with_context(
    transport: &dyn ModelTransport,
    user: UserTurn,
    options: &GenerateOptions,
    loop_options: &ToolLoopOptions,
) -> Result<ToolLoopResult, AgentRunError> {
    let Some(user_content) = user.into_content() else {
        return Err(anyhow::anyhow!("message is empty").into());
    };

    let registry = options.tools.build(&options.context).await;
    let mut contents = history_to_contents(&options.history);
    debug!(
        history = options.history.len(),
        contents = contents.len(),
        "converted history"
    );
    contents.push(user_content);

    info!(
        model = %options.model,
        tools = registry.len(),
        thinking = options.thinking_enabled,
        "starting chat run"
    );

    let base = options.base_config();
    let task_config;
    let config_provider: &dyn ConfigProvider = match &options.context.tasks {
        Some(tasks) => {
            task_config = TaskContextConfig {
                base,
                tasks: Arc::clone(tasks),
            };
            &task_config
        },
        None => &base,
    };

    run_tool_streaming_loop(
        transport,
        &options.model,
        contents,
        config_provider,
        &registry,
        loop_options,
    )
    .await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            model::{FunctionCall, Role, StreamChunk},
            runner::LoopStatus,
            testing::ScriptedTransport,
            tools::{InMemoryTaskList, TaskListClient},
        },
        async_trait::async_trait,
        serde_json::json,
        std::sync::atomic::{AtomicBool, Ordering},
        tabpilot_mcp::{McpClient, ToolsCallResult, ToolsListResult},
    };

    struct ClosingServer {
        closed: AtomicBool,
    }

    #[async_trait]
    impl McpClient for ClosingServer {
        fn server_name(&self) -> &str {
            "closing"
        }

        async fn list_tools_page(
            &self,
            _cursor: Option<&str>,
        ) -> tabpilot_mcp::Result<ToolsListResult> {
            Ok(ToolsListResult::default())
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Value,
        ) -> tabpilot_mcp::Result<ToolsCallResult> {
            Ok(ToolsCallResult::default())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn settings() -> ChatSettings {
        ChatSettings {
            api_key: None,
            model: "gemini-test".into(),
            thinking_enabled: true,
            thinking_budget: Some(512),
            auto_run_tools: true,
            mcp_servers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn history_and_user_turn_reach_the_model() {
        let transport = ScriptedTransport::new(vec![vec![StreamChunk::text("Sure.")]]);
        let mut options = GenerateOptions::from_settings(&settings(), &ChatConfig::default(), |c| c);
        options.system_prompt = Some("You live in a browser.".into());
        options.history = vec![
            json!({"role": "user", "content": "hi"}),
            json!({"role": "assistant", "content": "hello"}),
        ];

        let result = run_chat(&transport, UserTurn::text("open docs"), options)
            .await
            .unwrap();
        assert_eq!(result.text, "Sure.");
        assert_eq!(result.status, LoopStatus::Completed);

        let request = &transport.requests()[0];
        assert_eq!(request.model, "gemini-test");
        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[2], Content::user_text("open docs"));
        assert_eq!(
            request.config.system_instruction.as_deref(),
            Some("You live in a browser.")
        );
        let thinking = request.config.thinking.as_ref().unwrap();
        assert!(thinking.include_thoughts);
        assert_eq!(thinking.thinking_budget, Some(512));
    }

    #[tokio::test]
    async fn task_tools_feed_the_system_instruction() {
        let tasks = Arc::new(InMemoryTaskList::new());
        let transport = ScriptedTransport::new(vec![
            vec![StreamChunk::calls(vec![FunctionCall::new(
                "add_task",
                json!({"title": "Find flights"}),
            )])],
            vec![StreamChunk::text("Planned.")],
        ]);
        let attach_tasks = Arc::clone(&tasks);
        let options = GenerateOptions::from_settings(&settings(), &ChatConfig::default(), |c| {
            c.tasks(attach_tasks)
        });

        let result = run_chat(&transport, UserTurn::text("plan a trip"), options)
            .await
            .unwrap();
        assert_eq!(result.events.len(), 1);
        assert!(result.events[0].succeeded());
        assert_eq!(tasks.list().await.unwrap().len(), 1);

        let requests = transport.requests();
        assert!(requests[0].config.system_instruction.is_none());
        assert_eq!(
            requests[1].config.system_instruction.as_deref(),
            Some("Current task list:\n[ ] #1 Find flights")
        );
        assert!(requests[0].config.tools.iter().any(|d| d.name == "add_task"));
    }

    #[tokio::test]
    async fn disabled_auto_run_reports_access_denied() {
        let transport = ScriptedTransport::new(vec![
            vec![StreamChunk::calls(vec![FunctionCall::new("list_tasks", json!({}))])],
            vec![StreamChunk::text("Cannot.")],
        ]);
        let settings = ChatSettings {
            auto_run_tools: false,
            ..settings()
        };
        let options = GenerateOptions::from_settings(&settings, &ChatConfig::default(), |c| {
            c.tasks(Arc::new(InMemoryTaskList::new()))
        });

        let result = run_chat(&transport, UserTurn::text("tasks?"), options)
            .await
            .unwrap();
        assert_eq!(
            result.events[0].error.as_deref(),
            Some("Tool execution is disabled. Enable auto-run in settings to allow tools.")
        );
    }

    #[tokio::test]
    async fn mcp_clients_are_closed_on_failure() {
        let server = Arc::new(ClosingServer {
            closed: AtomicBool::new(false),
        });
        let transport = ScriptedTransport::failing("503 unavailable");
        let attach = Arc::clone(&server);
        let options = GenerateOptions::from_settings(&settings(), &ChatConfig::default(), |c| {
            c.mcp_client(attach)
        });

        let err = run_chat(&transport, UserTurn::text("hi"), options)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentRunError::Other(_)));
        assert!(server.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_a_request() {
        let server = Arc::new(ClosingServer {
            closed: AtomicBool::new(false),
        });
        let transport = ScriptedTransport::new(Vec::new());
        let attach = Arc::clone(&server);
        let options = GenerateOptions::from_settings(&settings(), &ChatConfig::default(), |c| {
            c.mcp_client(attach)
        });

        let err = run_chat(&transport, UserTurn::text("   "), options)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "message is empty");
        assert!(transport.requests().is_empty());
        assert!(server.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn attachments_ride_along_with_the_message() {
        let turn = UserTurn {
            message: "what is on screen?".into(),
            attachments: vec![Attachment {
                mime_type: None,
                data: "data:image/png;base64,AAAA".into(),
            }],
        };
        let content = turn.into_content().unwrap();
        assert_eq!(content.role, Role::User);
        assert_eq!(content.parts.len(), 2);
    }
}
