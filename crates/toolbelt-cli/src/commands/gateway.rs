//! Gateway command - start and probe the gateway server.

use crate::ui;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use toolbelt_core::Config;
use toolbelt_core::config::BindMode;

/// Gateway command arguments.
#[derive(Debug, Clone)]
pub struct GatewayArgs {
    /// Subcommand.
    pub action: GatewayAction,
    /// Explicit configuration file.
    pub config: Option<PathBuf>,
}

/// Gateway actions.
#[derive(Debug, Clone)]
pub enum GatewayAction {
    /// Start the server in the foreground.
    Run {
        /// Port to listen on.
        port: Option<u16>,
        /// Bind address.
        bind: Option<String>,
        /// Skip the port-in-use check.
        force: bool,
    },
    /// Probe a running server.
    Status,
}

/// Run the gateway command.
pub async fn run_gateway(args: GatewayArgs) -> Result<()> {
    let mut config = super::load_config(args.config.as_deref())
        .context("Run 'toolbelt config validate' for details")?;

    match args.action {
        GatewayAction::Run { port, bind, force } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(bind) = bind {
                config.gateway.mode = parse_bind(&bind);
            }
            run_gateway_server(&config, force).await
        }
        GatewayAction::Status => gateway_status(&config).await,
    }
}

/// Map a `--bind` value onto a bind mode.
fn parse_bind(value: &str) -> BindMode {
    match value.trim().to_ascii_lowercase().as_str() {
        "loopback" | "local" | "localhost" => BindMode::Local,
        "lan" | "public" | "all" => BindMode::Public,
        _ => BindMode::Custom(value.trim().to_string()),
    }
}

/// Start the gateway server.
async fn run_gateway_server(config: &Config, force: bool) -> Result<()> {
    let bind_address = config.gateway.bind_address();
    let port = config.gateway.port;

    if !force && std::net::TcpListener::bind(format!("{bind_address}:{port}")).is_err() {
        anyhow::bail!("Port {port} is already in use. Use --force to try anyway.");
    }

    ui::header("Starting Toolbelt Gateway");
    ui::kv("Address", &format!("{bind_address}:{port}"));
    ui::kv(
        "Mode",
        match &config.gateway.mode {
            BindMode::Local => "local",
            BindMode::Public => "public",
            BindMode::Custom(_) => "custom",
        },
    );

    let providers: Vec<&str> = ["anthropic", "groq", "gemini", "openrouter"]
        .into_iter()
        .filter(|name| {
            config
                .providers
                .get(name)
                .is_some_and(|p| p.credential().is_some())
        })
        .collect();
    if providers.is_empty() {
        ui::warning("No provider API keys found; set ANTHROPIC_API_KEY, GROQ_API_KEY, GEMINI_API_KEY or OPENROUTER_API_KEY");
    } else {
        ui::kv("Providers", &providers.join(", "));
    }

    ui::kv(
        "Counters",
        if config.counter_store.is_some() {
            "shared (REST)"
        } else {
            "in-process"
        },
    );
    ui::kv(
        "Access",
        &match config.access.tokens.len() {
            0 => "open".to_string(),
            n => format!("{n} bearer token(s)"),
        },
    );
    if let Some(per_day) = config.limits.daily_credits {
        ui::kv("Daily credits", &per_day.to_string());
    }
    println!();

    ui::info("Press Ctrl+C to stop");
    println!();

    toolbelt_gateway::start(config).await?;

    ui::success("Gateway stopped");
    Ok(())
}

/// Check gateway status.
async fn gateway_status(config: &Config) -> Result<()> {
    ui::header("Gateway Status");

    let host = match &config.gateway.mode {
        BindMode::Custom(addr) if addr != "0.0.0.0" => addr.clone(),
        _ => "127.0.0.1".to_string(),
    };
    let url = format!("http://{host}:{}/health", config.gateway.port);

    let response = reqwest::Client::new()
        .get(&url)
        .timeout(Duration::from_secs(2))
        .send()
        .await;

    let body = match response {
        Ok(resp) if resp.status().is_success() => resp.json::<serde_json::Value>().await.ok(),
        Ok(resp) => {
            ui::warning(&format!("Health check returned {}", resp.status()));
            return Ok(());
        }
        Err(_) => {
            ui::warning(&format!("Gateway is not reachable at {url}"));
            ui::info("Start with: toolbelt gateway run");
            return Ok(());
        }
    };

    ui::success(&format!("Gateway is running on port {}", config.gateway.port));

    let Some(body) = body else {
        ui::warning("Health response was not JSON");
        return Ok(());
    };

    for (label, key) in [("Status", "status"), ("Version", "version"), ("Counters", "limiter")] {
        if let Some(value) = body.get(key).and_then(|v| v.as_str()) {
            ui::kv(label, value);
        }
    }
    if let Some(uptime) = body.get("uptimeSecs").and_then(serde_json::Value::as_i64) {
        ui::kv("Uptime", &format!("{uptime}s"));
    }
    if let Some(providers) = body.get("providers").and_then(|v| v.as_array()) {
        let names: Vec<&str> = providers.iter().filter_map(|p| p.as_str()).collect();
        ui::kv("Providers", &names.join(", "));
    }
    if let Some(total) = body.pointer("/usage/total") {
        let tokens = ["input_tokens", "output_tokens"]
            .iter()
            .filter_map(|k| total.get(k).and_then(serde_json::Value::as_u64))
            .sum::<u64>();
        let requests = total
            .get("request_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        ui::kv("Usage", &format!("{requests} requests, {tokens} tokens"));
    }

    Ok(())
}
