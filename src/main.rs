//! Shadow agent entry point

use clap::{Parser, Subcommand};
use shadow_agent::agent::AgentSupervisor;
use shadow_agent::config::AgentConfig;
use shadow_agent::observability::{init_default_logging, init_logging, LogFormat};
use shadow_agent::telemetry::{SensorSource, SimulatedPressureSensor};
use shadow_agent::transport::{mqtt::MqttClient, Transport};
use std::path::{Path, PathBuf};
use std::process;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info, Level};

/// Default configuration file locations, checked in order
const DEFAULT_CONFIG_PATHS: &[&str] = &["shadow-agent.toml", "config/shadow-agent.toml"];

/// Device agent: MQTT telemetry plus device shadow sync
#[derive(Parser)]
#[command(name = "shadow-agent")]
#[command(about = "Publishes sensor telemetry over MQTT and keeps the device shadow in sync")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run until SIGINT/SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn init_observability(verbose: u8) {
    let result = match verbose {
        0 => init_default_logging(),
        n => {
            let level = if n == 1 { Level::DEBUG } else { Level::TRACE };
            let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
            init_logging(level, format, false)
        }
    };

    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {e}");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_observability(cli.verbose);

    info!("Starting shadow-agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AgentConfig::load_from_file(path)?);
    }

    let path = DEFAULT_CONFIG_PATHS
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .ok_or(
            "No configuration file found. Provide one with -c/--config or create shadow-agent.toml",
        )?;

    info!("Loading configuration from: {}", path.display());
    Ok(AgentConfig::load_from_file(path)?)
}

async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(device_id = %config.device.id, broker = %config.mqtt.broker_url, "Application starting");

    let transport = MqttClient::new(&config.device.id, &config.mqtt)?;
    let mut agent = AgentSupervisor::new(config, transport, SimulatedPressureSensor::new())?;

    agent.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Agent is running");

    let session_lost = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            false
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            false
        }
        _ = monitor_connection_health(&agent) => {
            error!("MQTT connection permanently lost, shutting down agent...");
            true
        }
    };

    agent.shutdown().await?;
    if session_lost {
        return Err("Device session given up after the reconnect limit".into());
    }
    Ok(())
}

fn handle_config_command(
    config: &AgentConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(device_id = %config.device.id, "Configuration is valid");
    Ok(())
}

/// Resolve once the transport gives up reconnecting
async fn monitor_connection_health<T, S>(agent: &AgentSupervisor<T, S>)
where
    T: Transport + 'static,
    S: SensorSource + 'static,
{
    while !agent.is_permanently_disconnected() {
        sleep(Duration::from_millis(100)).await;
    }
}
