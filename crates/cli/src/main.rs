mod settings_commands;

use std::{io::Write as _, path::PathBuf, sync::Arc};

use {
    anyhow::{Context as _, bail},
    clap::{Parser, Subcommand},
    secrecy::Secret,
    serde_json::{Value, json},
    tabpilot_agents::{
        GenerateOptions, LoopStatus, OnEvent, RunnerEvent, ToolLoopResult, ToolRegistryBuilder,
        UserTurn, cancel_on,
        providers::GeminiTransport,
        run_chat,
        tools::{InMemoryTaskList, TaskListClient, mcp::connect_mcp_servers},
    },
    tabpilot_config::{
        ChatSettings, JsonFileSettingsStore, MemorySettingsStore, SettingsStore, TabpilotConfig,
        loader::load_first_in,
    },
    tokio::io::{AsyncBufReadExt, BufReader},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tabpilot", about = "Tabpilot: a Gemini assistant that drives tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/tabpilot/).
    #[arg(long, global = true, env = "TABPILOT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message, or start an interactive session when none is given.
    Chat {
        message: Option<String>,
        /// Run without any tools.
        #[arg(long, default_value_t = false)]
        no_tools: bool,
        /// Echo the model's thoughts to stderr.
        #[arg(long, default_value_t = false)]
        show_thinking: bool,
    },
    /// List models that support streaming generation.
    Models,
    /// Persisted settings.
    Settings {
        #[command(subcommand)]
        action: settings_commands::SettingsAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so streamed answers on stdout stay clean.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> TabpilotConfig {
    match &cli.config_dir {
        Some(dir) => load_first_in(std::slice::from_ref(dir)),
        None => tabpilot_config::discover_and_load(),
    }
}

fn settings_store(cli: &Cli) -> Box<dyn SettingsStore> {
    if let Some(dir) = &cli.config_dir {
        return Box::new(JsonFileSettingsStore::new(dir.join("settings.json")));
    }
    match JsonFileSettingsStore::in_data_dir() {
        Some(store) => Box::new(store),
        None => {
            warn!("no data directory available; settings will not persist");
            Box::new(MemorySettingsStore::new())
        },
    }
}

fn require_api_key(settings: &ChatSettings) -> anyhow::Result<Secret<String>> {
    match &settings.api_key {
        Some(key) => Ok(key.clone()),
        None => bail!(
            "no Gemini API key: set GEMINI_API_KEY or run `tabpilot settings set apiKey <key>`"
        ),
    }
}

/// Prints answer text to stdout and the tool timeline to stderr.
fn terminal_observer(show_thinking: bool) -> OnEvent {
    Box::new(move |event| match event {
        RunnerEvent::TextDelta(delta) => {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(delta.as_bytes());
            let _ = out.flush();
        },
        RunnerEvent::ThinkingDelta(delta) if show_thinking => {
            eprint!("\x1b[2m{delta}\x1b[0m");
        },
        RunnerEvent::ToolCallStart(tool) => eprintln!("\n→ {}", tool.label()),
        RunnerEvent::ToolCallEnd(tool) => match &tool.error {
            Some(error) => eprintln!("  {} failed: {error}", tool.label()),
            None => eprintln!("  ✓ {}", tool.label()),
        },
        _ => {},
    })
}

/// The two stored messages a finished exchange adds to the history.
fn history_entries(message: &str, result: &ToolLoopResult) -> [Value; 2] {
    [
        json!({ "role": "user", "content": message }),
        json!({
            "role": "assistant",
            "content": result.text,
            "toolEvents": result.events,
        }),
    ]
}

struct ChatSession {
    cfg: TabpilotConfig,
    settings: ChatSettings,
    transport: GeminiTransport,
    tasks: Arc<InMemoryTaskList>,
    no_tools: bool,
    show_thinking: bool,
    history: Vec<Value>,
}

impl ChatSession {
    async fn send(&mut self, message: &str) -> anyhow::Result<()> {
        // Clients are closed at the end of every run, so connect per message.
        let mcp_clients = if self.no_tools {
            Vec::new()
        } else {
            connect_mcp_servers(&self.settings.mcp_servers).await
        };
        let tasks: Arc<dyn TaskListClient> = self.tasks.clone();

        let mut options = GenerateOptions::from_settings(&self.settings, &self.cfg.chat, |ctx| {
            mcp_clients
                .into_iter()
                .fold(ctx.tasks(tasks), |ctx, client| ctx.mcp_client(client))
        });
        if self.no_tools {
            options.tools = ToolRegistryBuilder::new();
        }
        options.history = self.history.clone();
        options.on_event = Some(terminal_observer(self.show_thinking));

        let token = CancellationToken::new();
        options.should_continue = Some(cancel_on(token.clone()));
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });

        let outcome = run_chat(&self.transport, UserTurn::text(message), options).await;
        watcher.abort();
        println!();

        let result = outcome?;
        match result.status {
            LoopStatus::Completed => {},
            LoopStatus::Interrupted => eprintln!("(interrupted)"),
            LoopStatus::Exhausted => eprintln!(
                "(stopped after {} tool rounds with tool calls still pending)",
                result.iterations - 1
            ),
        }
        self.history.extend(history_entries(message, &result));
        Ok(())
    }

    async fn interactive(&mut self) -> anyhow::Result<()> {
        eprintln!(
            "tabpilot {} (model {}). Ctrl-D to quit.",
            env!("CARGO_PKG_VERSION"),
            self.settings.model
        );
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("> ");
            let _ = std::io::stderr().flush();
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }
            if let Err(e) = self.send(line).await {
                eprintln!("error: {e:#}");
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "tabpilot starting");

    let cfg = load_config(&cli);
    let store = settings_store(&cli);

    match cli.command {
        Commands::Chat {
            message,
            no_tools,
            show_thinking,
        } => {
            let settings = ChatSettings::load(store.as_ref(), &cfg)
                .await
                .context("failed to load settings")?;
            let transport =
                GeminiTransport::new(require_api_key(&settings)?, &cfg.providers.gemini.base_url);
            let mut session = ChatSession {
                cfg,
                settings,
                transport,
                tasks: Arc::new(InMemoryTaskList::new()),
                no_tools,
                show_thinking,
                history: Vec::new(),
            };
            match message {
                Some(message) => session.send(&message).await,
                None => session.interactive().await,
            }
        },
        Commands::Models => {
            let settings = ChatSettings::load(store.as_ref(), &cfg).await?;
            let transport =
                GeminiTransport::new(require_api_key(&settings)?, &cfg.providers.gemini.base_url);
            let models = transport.list_models().await?;
            if models.is_empty() {
                println!("No streaming models found.");
            }
            for model in &models {
                let marker = if model.model_id() == settings.model {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {:<32} {} ({} tokens)",
                    model.model_id(),
                    model.display_name,
                    model.input_token_limit
                );
            }
            Ok(())
        },
        Commands::Settings { action } => {
            settings_commands::handle_settings(store.as_ref(), action).await
        },
    }
}
