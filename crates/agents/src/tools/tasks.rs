//! Task list tools and the config provider that keeps the model aware of the
//! current list.

use std::{
    fmt::Write as _,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    tokio::sync::RwLock,
};

use crate::{
    model::GenerateConfig,
    runner::ConfigProvider,
    tool_registry::{AgentTool, ToolContext, ToolDefinition, ToolProvider, guarded},
    tools::required_str,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Done => "[x]",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(anyhow!(
                "invalid status '{other}': expected pending, in_progress or done"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Storage for the session task list.
#[async_trait]
pub trait TaskListClient: Send + Sync {
    async fn list(&self) -> Result<Vec<Task>>;
    async fn add(&self, title: &str) -> Result<Task>;
    /// Update a task; `None` fields are left as they are.
    async fn update(
        &self,
        id: u64,
        title: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Task>;
    /// Remove every task, returning how many were removed.
    async fn clear(&self) -> Result<usize>;
}

/// Process-local task list.
#[derive(Default)]
pub struct InMemoryTaskList {
    tasks: RwLock<Vec<Task>>,
    next_id: AtomicU64,
}

impl InMemoryTaskList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskListClient for InMemoryTaskList {
    async fn list(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.read().await.clone())
    }

    async fn add(&self, title: &str) -> Result<Task> {
        let task = Task {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            title: title.to_string(),
            status: TaskStatus::Pending,
        };
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn update(
        &self,
        id: u64,
        title: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("no task with id {id}"))?;
        if let Some(title) = title {
            task.title = title.to_string();
        }
        if let Some(status) = status {
            task.status = status;
        }
        Ok(task.clone())
    }

    async fn clear(&self) -> Result<usize> {
        let mut tasks = self.tasks.write().await;
        let removed = tasks.len();
        tasks.clear();
        Ok(removed)
    }
}

/// Render the list as a short checklist for the system instruction.
pub fn render_summary(tasks: &[Task]) -> String {
    let mut out = String::from("Current task list:");
    if tasks.is_empty() {
        out.push_str(" (empty)");
    }
    for task in tasks {
        let _ = write!(out, "\n{} #{} {}", task.status.marker(), task.id, task.title);
    }
    out
}

/// Registers the task tools when the context has a task list.
pub struct TaskTools;

fn task_tool<F, Fut>(
    ctx: &Arc<ToolContext>,
    tasks: &Arc<dyn TaskListClient>,
    name: &str,
    description: &str,
    parameters: Value,
    f: F,
) -> Arc<dyn AgentTool>
where
    F: Fn(Arc<dyn TaskListClient>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let tasks = Arc::clone(tasks);
    let handler = guarded(ctx, move |_ctx, args| f(Arc::clone(&tasks), args));
    Arc::new(ToolDefinition::new(name, description, parameters, handler))
}

fn task_id(params: &Value) -> Result<u64> {
    params
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("missing 'id' parameter"))
}

#[async_trait]
impl ToolProvider for TaskTools {
    fn name(&self) -> &str {
        "tasks"
    }

    async fn tools(&self, ctx: &Arc<ToolContext>) -> Result<Vec<Arc<dyn AgentTool>>> {
        let Some(tasks) = ctx.tasks.as_ref() else {
            return Ok(Vec::new());
        };

        Ok(vec![
            task_tool(
                ctx,
                tasks,
                "list_tasks",
                "List the tasks in the current plan.",
                json!({"type": "object", "properties": {}}),
                |tasks, _args| async move { Ok(json!({ "tasks": tasks.list().await? })) },
            ),
            task_tool(
                ctx,
                tasks,
                "add_task",
                "Add a task to the plan.",
                json!({
                    "type": "object",
                    "properties": {"title": {"type": "string"}},
                    "required": ["title"]
                }),
                |tasks, args| async move {
                    let task = tasks.add(required_str(&args, "title")?).await?;
                    Ok(json!({ "task": task }))
                },
            ),
            task_tool(
                ctx,
                tasks,
                "update_task",
                "Rename a task or change its status.",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer"},
                        "title": {"type": "string"},
                        "status": {"type": "string", "enum": ["pending", "in_progress", "done"]}
                    },
                    "required": ["id"]
                }),
                |tasks, args| async move {
                    let id = task_id(&args)?;
                    let title = args.get("title").and_then(Value::as_str);
                    let status = args
                        .get("status")
                        .and_then(Value::as_str)
                        .map(str::parse::<TaskStatus>)
                        .transpose()?;
                    if title.is_none() && status.is_none() {
                        anyhow::bail!("nothing to update: pass 'title' or 'status'");
                    }
                    let task = tasks.update(id, title, status).await?;
                    Ok(json!({ "task": task }))
                },
            ),
            task_tool(
                ctx,
                tasks,
                "clear_tasks",
                "Remove every task from the plan.",
                json!({"type": "object", "properties": {}}),
                |tasks, _args| async move { Ok(json!({ "removed": tasks.clear().await? })) },
            ),
        ])
    }
}

/// Config provider that appends the live task summary to the base system
/// instruction. Read fresh on every iteration.
pub struct TaskContextConfig {
    pub base: GenerateConfig,
    pub tasks: Arc<dyn TaskListClient>,
}

#[async_trait]
impl ConfigProvider for TaskContextConfig {
    async fn config(&self) -> Result<GenerateConfig> {
        let tasks = self.tasks.list().await?;
        let mut config = self.base.clone();
        if tasks.is_empty() {
            return Ok(config);
        }
        let summary = render_summary(&tasks);
        config.system_instruction = Some(match config.system_instruction.take() {
            Some(base) if !base.is_empty() => format!("{base}\n\n{summary}"),
            _ => summary,
        });
        Ok(config)
    }
}
