use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::TabpilotConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "tabpilot.toml",
    "tabpilot.yaml",
    "tabpilot.yml",
    "tabpilot.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TabpilotConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply env overrides.
///
/// Search order:
/// 1. `./tabpilot.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tabpilot/tabpilot.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `TabpilotConfig::default()` if nothing is found or the file
/// fails to parse.
pub fn discover_and_load() -> TabpilotConfig {
    let mut dirs = vec![PathBuf::from(".")];
    dirs.extend(config_dir());
    load_first_in(&dirs)
}

/// Like [`discover_and_load`] but searching an explicit list of directories.
pub fn load_first_in(dirs: &[PathBuf]) -> TabpilotConfig {
    let mut cfg = match find_config_file(dirs) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                TabpilotConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            TabpilotConfig::default()
        },
    };
    apply_env_overrides(&mut cfg, |name| std::env::var(name).ok());
    cfg
}

/// Overlay `GEMINI_API_KEY`, `TABPILOT_MODEL` and `TABPILOT_AUTO_RUN`.
pub fn apply_env_overrides(cfg: &mut TabpilotConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
        cfg.providers.gemini.api_key = Some(Secret::new(key));
    }
    if let Some(model) = lookup("TABPILOT_MODEL").filter(|m| !m.trim().is_empty()) {
        cfg.chat.model = model;
    }
    if let Some(flag) = lookup("TABPILOT_AUTO_RUN") {
        match flag.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => cfg.tools.auto_run = true,
            "0" | "false" | "no" | "off" => cfg.tools.auto_run = false,
            other => warn!(value = other, "ignoring unrecognised TABPILOT_AUTO_RUN"),
        }
    }
}

fn find_config_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/tabpilot/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tabpilot").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user-global data directory, used for persisted settings.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tabpilot").map(|d| d.data_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TabpilotConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn loads_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabpilot.yaml");
        std::fs::write(&path, "chat:\n  model: gemini-2.5-pro\n  max_iterations: 5\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chat.model, "gemini-2.5-pro");
        assert_eq!(cfg.chat.max_iterations, 5);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabpilot.ini");
        std::fs::write(&path, "x").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(
            first.path().join("tabpilot.json"),
            r#"{"chat": {"model": "first"}}"#,
        )
        .unwrap();
        std::fs::write(
            second.path().join("tabpilot.toml"),
            "[chat]\nmodel = \"second\"\n",
        )
        .unwrap();
        let path =
            find_config_file(&[first.path().to_path_buf(), second.path().to_path_buf()]).unwrap();
        assert!(path.ends_with("tabpilot.json"));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tabpilot.toml"), "chat = [").unwrap();
        let cfg = load_first_in(&[dir.path().to_path_buf()]);
        assert_eq!(cfg.chat.max_iterations, crate::schema::DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = TabpilotConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "GEMINI_API_KEY" => Some("key-123".into()),
            "TABPILOT_MODEL" => Some("gemini-2.5-pro".into()),
            "TABPILOT_AUTO_RUN" => Some("off".into()),
            _ => None,
        });
        assert_eq!(
            cfg.providers.gemini.api_key.as_ref().unwrap().expose_secret(),
            "key-123"
        );
        assert_eq!(cfg.chat.model, "gemini-2.5-pro");
        assert!(!cfg.tools.auto_run);
    }
}
