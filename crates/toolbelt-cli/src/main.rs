//! Toolbelt CLI - operate the Toolbelt AI gateway.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use toolbelt_core::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "toolbelt")]
#[command(about = "Toolbelt - rate-limited gateway to hosted AI models")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ~/.toolbelt/toolbelt.json)
    #[arg(short, long, global = true, env = "TOOLBELT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway operations
    Gateway {
        #[command(subcommand)]
        action: GatewayCommands,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum GatewayCommands {
    /// Start the gateway server
    Run {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (loopback, lan, or IP)
        #[arg(long)]
        bind: Option<String>,

        /// Skip the port-in-use check
        #[arg(long)]
        force: bool,
    },

    /// Check gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration (secrets omitted)
    Show,

    /// Print one value, e.g. `limits.ai.maxRequests`
    Get {
        /// Dotted key path
        key: String,
    },

    /// Validate configuration
    Validate,

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = commands::load_config(cli.config.as_deref())
        .map(|c| c.settings)
        .unwrap_or_default();
    init_logging(cli.verbose || settings.debug, &settings.log_format);

    match cli.command {
        Commands::Gateway { action } => {
            let action = match action {
                GatewayCommands::Run { port, bind, force } => {
                    commands::gateway::GatewayAction::Run { port, bind, force }
                }
                GatewayCommands::Status => commands::gateway::GatewayAction::Status,
            };
            commands::run_gateway(commands::gateway::GatewayArgs {
                action,
                config: cli.config,
            })
            .await?;
        }

        Commands::Config { action } => {
            let action = match action.unwrap_or(ConfigCommands::Show) {
                ConfigCommands::Show => commands::config::ConfigAction::Show,
                ConfigCommands::Get { key } => commands::config::ConfigAction::Get(key),
                ConfigCommands::Validate => commands::config::ConfigAction::Validate,
                ConfigCommands::Path => commands::config::ConfigAction::Path,
            };
            commands::run_config(commands::config::ConfigArgs {
                action,
                config: cli.config,
            })?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, format: &LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}
