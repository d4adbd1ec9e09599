//! Persistent settings: a small async key-value contract plus two backends.
//!
//! The chat surface stores user choices (API key, model, thinking toggle,
//! auto-run toggle, MCP servers) under fixed keys. [`ChatSettings::load`]
//! overlays whatever is persisted on top of the file/env config.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    secrecy::Secret,
    serde_json::Value,
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, warn},
};

use crate::schema::{McpServerConfig, TabpilotConfig};

/// Keys used by the chat surface.
pub mod keys {
    pub const API_KEY: &str = "apiKey";
    pub const MODEL: &str = "model";
    pub const THINKING_ENABLED: &str = "thinkingEnabled";
    pub const THINKING_BUDGET: &str = "thinkingBudget";
    pub const AUTO_RUN_TOOLS: &str = "autoRunTools";
    pub const MCP_SERVERS: &str = "mcpServers";
}

/// Async key-value settings storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Process-local store, used in tests and when nothing should touch disk.
#[derive(Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings persisted as a single JSON object on disk.
///
/// Writes go to a sibling temp file that is renamed over the original, so a
/// crash mid-write never leaves a truncated settings file behind.
pub struct JsonFileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store under the user data dir (`settings.json`).
    pub fn in_data_dir() -> Option<Self> {
        crate::loader::data_dir().map(|dir| Self::new(dir.join("settings.json")))
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("corrupt settings file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&all)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), key, "saved setting");
        Ok(())
    }
}

/// Effective chat settings for one run.
#[derive(Clone)]
pub struct ChatSettings {
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub thinking_enabled: bool,
    pub thinking_budget: Option<i32>,
    pub auto_run_tools: bool,
    pub mcp_servers: Vec<McpServerConfig>,
}

impl ChatSettings {
    /// Config-only settings, without consulting a store.
    pub fn from_config(cfg: &TabpilotConfig) -> Self {
        Self {
            api_key: cfg.providers.gemini.api_key.clone(),
            model: cfg.chat.model.clone(),
            thinking_enabled: cfg.chat.thinking_enabled,
            thinking_budget: cfg.chat.thinking_budget,
            auto_run_tools: cfg.tools.auto_run,
            mcp_servers: cfg.mcp.enabled_servers().cloned().collect(),
        }
    }

    /// Overlay persisted values from `store` on top of `cfg`.
    ///
    /// Values of the wrong shape are ignored with a warning rather than
    /// failing the whole load.
    pub async fn load(store: &dyn SettingsStore, cfg: &TabpilotConfig) -> Result<Self> {
        let mut settings = Self::from_config(cfg);

        if let Some(key) = store.get(keys::API_KEY).await?.as_ref().and_then(Value::as_str)
            && !key.trim().is_empty()
        {
            settings.api_key = Some(Secret::new(key.to_string()));
        }
        if let Some(model) = store.get(keys::MODEL).await?.as_ref().and_then(Value::as_str)
            && !model.trim().is_empty()
        {
            settings.model = model.to_string();
        }
        if let Some(v) = store.get(keys::THINKING_ENABLED).await? {
            match v.as_bool() {
                Some(b) => settings.thinking_enabled = b,
                None => warn!(key = keys::THINKING_ENABLED, "expected a boolean setting"),
            }
        }
        if let Some(v) = store.get(keys::THINKING_BUDGET).await? {
            settings.thinking_budget = v.as_i64().and_then(|n| i32::try_from(n).ok());
        }
        if let Some(v) = store.get(keys::AUTO_RUN_TOOLS).await? {
            match v.as_bool() {
                Some(b) => settings.auto_run_tools = b,
                None => warn!(key = keys::AUTO_RUN_TOOLS, "expected a boolean setting"),
            }
        }
        if let Some(v) = store.get(keys::MCP_SERVERS).await? {
            match serde_json::from_value::<Vec<McpServerConfig>>(v) {
                Ok(servers) => {
                    settings.mcp_servers = servers.into_iter().filter(|s| s.enabled).collect();
                },
                Err(e) => warn!(key = keys::MCP_SERVERS, error = %e, "invalid MCP server list"),
            }
        }

        Ok(settings)
    }
}

impl std::fmt::Debug for ChatSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("thinking_enabled", &self.thinking_enabled)
            .field("thinking_budget", &self.thinking_budget)
            .field("auto_run_tools", &self.auto_run_tools)
            .field("mcp_servers", &self.mcp_servers)
            .finish()
    }
}
