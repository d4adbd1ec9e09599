//! Configuration loading, env substitution, and persisted chat settings.
//!
//! Config files: `tabpilot.toml`, `tabpilot.yaml`, or `tabpilot.json`,
//! searched in `./` then `~/.config/tabpilot/`.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod store;

pub use {
    loader::{apply_env_overrides, config_dir, data_dir, discover_and_load, load_config},
    schema::{
        ChatConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL, GeminiConfig, McpConfig,
        McpServerConfig, ProvidersConfig, TabpilotConfig, ToolsConfig,
    },
    store::{ChatSettings, JsonFileSettingsStore, MemorySettingsStore, SettingsStore},
};
