use {
    anyhow::{Result, bail},
    clap::Subcommand,
    serde_json::Value,
    tabpilot_config::{SettingsStore, store::keys},
};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print one persisted setting, or all known ones.
    Get { key: Option<String> },
    /// Persist a setting. The value is parsed as JSON, falling back to a
    /// plain string.
    Set { key: String, value: String },
}

const KNOWN_KEYS: &[&str] = &[
    keys::API_KEY,
    keys::MODEL,
    keys::THINKING_ENABLED,
    keys::THINKING_BUDGET,
    keys::AUTO_RUN_TOOLS,
    keys::MCP_SERVERS,
];

/// ANSI color codes.
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub async fn handle_settings(store: &dyn SettingsStore, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Get { key: Some(key) } => {
            ensure_known(&key)?;
            match store.get(&key).await? {
                Some(value) => println!("{}", display_value(&key, &value)),
                None => eprintln!("{key} is not set"),
            }
        },
        SettingsAction::Get { key: None } => {
            for key in KNOWN_KEYS {
                let shown = match store.get(key).await? {
                    Some(value) => display_value(key, &value),
                    None => "(unset)".to_string(),
                };
                println!("  {BOLD}{CYAN}{key}{RESET} {shown}");
            }
        },
        SettingsAction::Set { key, value } => {
            ensure_known(&key)?;
            store.set(&key, parse_value(&value)).await?;
            eprintln!("saved {key}");
        },
    }
    Ok(())
}

fn ensure_known(key: &str) -> Result<()> {
    if KNOWN_KEYS.contains(&key) {
        Ok(())
    } else {
        bail!("unknown setting '{key}' (known: {})", KNOWN_KEYS.join(", "))
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn display_value(key: &str, value: &Value) -> String {
    if key == keys::API_KEY {
        return "[REDACTED]".to_string();
    }
    value.to_string()
}
