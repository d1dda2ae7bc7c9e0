//! Config inspection command.

use crate::ui;
use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;
use toolbelt_core::Config;

/// Config command arguments.
#[derive(Debug, Clone)]
pub struct ConfigArgs {
    /// Subcommand.
    pub action: ConfigAction,
    /// Explicit configuration file.
    pub config: Option<PathBuf>,
}

/// Config actions.
#[derive(Debug, Clone)]
pub enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print one value by dotted path.
    Get(String),
    /// Check the file and environment.
    Validate,
    /// Print the file path.
    Path,
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    let path = super::config_path(args.config.as_deref());

    match args.action {
        ConfigAction::Path => {
            println!("{}", path.display());
            if !path.exists() {
                ui::info("File does not exist yet; defaults are in effect");
            }
            Ok(())
        }
        ConfigAction::Validate => validate_config(args.config.as_deref(), &path),
        ConfigAction::Show => {
            let config = super::load_config(args.config.as_deref())?;
            show_config(&config)
        }
        ConfigAction::Get(key) => {
            let config = super::load_config(args.config.as_deref())?;
            let value = serde_json::to_value(&config)?;
            match lookup(&value, &key) {
                Some(Value::String(s)) => println!("{s}"),
                Some(other) => println!("{}", serde_json::to_string_pretty(other)?),
                None => anyhow::bail!("Key not found: {key}"),
            }
            Ok(())
        }
    }
}

/// Print the configuration with secrets replaced by presence markers.
fn show_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    ui::header("Secrets");
    for name in ["anthropic", "groq", "gemini", "openrouter"] {
        let present = config
            .providers
            .get(name)
            .is_some_and(|p| p.credential().is_some());
        ui::presence(&format!("providers.{name}.apiKey"), present);
    }
    ui::presence(
        "counterStore.token",
        config
            .counter_store
            .as_ref()
            .is_some_and(|s| s.token.is_some()),
    );
    ui::presence("access.tokens", !config.access.tokens.is_empty());
    ui::presence("webhooks.signingSecret", config.webhooks.signing_secret.is_some());
    Ok(())
}

fn validate_config(explicit: Option<&std::path::Path>, path: &std::path::Path) -> Result<()> {
    ui::header("Validating configuration");
    ui::kv("File", &path.display().to_string());

    let config = match super::load_config(explicit) {
        Ok(config) => config,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            anyhow::bail!("Configuration is invalid");
        }
    };

    // Environment overrides can still produce an invalid combination
    if let Err(e) = config.validate() {
        ui::error(&e.to_string());
        anyhow::bail!("Configuration is invalid");
    }

    if !path.exists() {
        ui::info("No config file; defaults plus environment are in effect");
    }
    ui::success("Configuration is valid");
    Ok(())
}

/// Follow a dotted path through objects and arrays.
fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(value, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
