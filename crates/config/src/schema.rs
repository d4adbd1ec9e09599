//! Config schema types (chat, tools, providers, MCP servers).
use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Model used when neither the config file nor the settings store names one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Fallback loop limit used when the configured value is missing or zero.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TabpilotConfig {
    pub chat: ChatConfig,
    pub tools: ToolsConfig,
    pub providers: ProvidersConfig,
    pub mcp: McpConfig,
}

/// Chat behaviour defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Model identifier sent to the generative-language API.
    pub model: String,
    /// Ask the model to stream its reasoning ("thinking") text.
    pub thinking_enabled: bool,
    /// Token budget for thinking. `None` lets the model decide.
    pub thinking_budget: Option<i32>,
    /// Extra system prompt text prepended to every request.
    pub system_prompt: Option<String>,
    /// Maximum tool batches per run before the loop gives up.
    pub max_iterations: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            thinking_enabled: true,
            thinking_budget: None,
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Tool execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// When false, every tool handler fails with an access-denied error.
    pub auto_run: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { auto_run: true }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub gemini: GeminiConfig,
}

/// Gemini (generative-language API) settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key. The `GEMINI_API_KEY` env var takes precedence when set.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    pub base_url: String,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".into(),
        }
    }
}

/// Remote MCP servers whose tools are merged into every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
}

/// A single MCP server reachable over streamable HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Extra request headers (e.g. `Authorization`).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl McpConfig {
    /// Servers that are switched on.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
