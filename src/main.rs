//! AS4 message service handler - command line entry point

use as4msh::config::MshConfig;
use as4msh::observability::{init_default_logging, init_logging, metrics};
use as4msh::pmode::SendingPMode;
use as4msh::protocol::As4Message;
use as4msh::transport::{MessageSender, TransportError};
use as4msh::MessageServiceHandler;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

/// AS4 message service handler
#[derive(Parser)]
#[command(name = "as4msh")]
#[command(about = "AS4 message service handler: pipelines, PModes, security and reception awareness")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every pipeline, PMode and certificate and report the first error
    Validate,
    /// Inspect the loaded configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

/// Stands in for the transport when nothing is sent
struct OfflineSender;

#[async_trait]
impl MessageSender for OfflineSender {
    async fn send(
        &self,
        _message: &As4Message,
        pmode: &SendingPMode,
    ) -> Result<Option<As4Message>, TransportError> {
        Err(TransportError::Http(format!(
            "no transport available while validating (PMode '{}')",
            pmode.id
        )))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings live in the configuration file, so load it first
    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_default_logging();
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    init_logging(&config.logging.clone().with_env_overrides());

    info!("Starting as4msh v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Validate => validate(&config),
        Commands::Config { show, json } => handle_config_command(&config, show, json),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<MshConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => Ok(MshConfig::load_from_file(path)?),
        None => {
            let default_paths = ["as4msh.toml", "config/as4msh.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    return Ok(MshConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create as4msh.toml".into())
        }
    }
}

fn validate(config: &MshConfig) -> Result<(), Box<dyn std::error::Error>> {
    let msh = MessageServiceHandler::from_config(config, Arc::new(OfflineSender))?;

    let snapshot = msh.pmodes().snapshot();
    info!(
        msh_id = msh.id(),
        pipelines = ?msh.pipelines().names().collect::<Vec<_>>(),
        receiving_pmodes = snapshot.receiving.len(),
        sending_pmodes = snapshot.sending_count(),
        uptime_seconds = metrics().get_metrics().uptime_seconds,
        "Configuration is valid"
    );
    Ok(())
}

fn handle_config_command(
    config: &MshConfig,
    show: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!("{}", toml::to_string_pretty(config)?);
        }
    }

    info!("Configuration validation complete");
    Ok(())
}
