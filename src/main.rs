//! Sensor Gateway - Main Entry Point
//!
//! Runs the device state machine against the host radio, and manages the
//! files in the host radio store.

use clap::{Parser, Subcommand};
use sensor_gateway::config::GatewayConfig;
use sensor_gateway::device::machine::FACTORY_RESET_FILES;
use sensor_gateway::device::{
    parse_configuration, parse_console_input, Device, PendingEvent, Peripherals, TickOutcome,
};
use sensor_gateway::observability::init_default_logging;
use sensor_gateway::peripherals::{LogDisplay, LogIndicator, SimulatedSensors};
use sensor_gateway::transport::store::{paths, FileStore};
use sensor_gateway::transport::{Transport, TransportError};
use sensor_gateway::HostRadio;
use std::path::{Path, PathBuf};
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// IoT sensor gateway
#[derive(Parser)]
#[command(name = "sensor-gateway")]
#[command(about = "IoT sensor gateway with cloud dispatch")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the device and run the control loop
    Run,
    /// Validate the host configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
    /// Copy configuration and certificate files into the radio store
    Upload {
        /// Device configuration JSON
        #[arg(long, value_name = "FILE")]
        device_config: Option<PathBuf>,
        /// Primary root CA
        #[arg(long, value_name = "FILE")]
        root_ca: Option<PathBuf>,
        /// Fallback root CA
        #[arg(long, value_name = "FILE")]
        fallback_ca: Option<PathBuf>,
        /// Device certificate
        #[arg(long, value_name = "FILE")]
        device_cert: Option<PathBuf>,
        /// Device private key
        #[arg(long, value_name = "FILE")]
        device_key: Option<PathBuf>,
    },
    /// Delete configuration and credentials from the radio store
    Reset,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting sensor gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match GatewayConfig::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_gateway(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Upload {
            device_config,
            root_ca,
            fallback_ca,
            device_cert,
            device_key,
        } => {
            let files = [
                (paths::CONFIG_FILE, device_config),
                (paths::ROOT_CA, root_ca),
                (paths::FALLBACK_ROOT_CA, fallback_ca),
                (paths::DEVICE_CERT, device_cert),
                (paths::DEVICE_KEY, device_key),
            ];
            upload_files(&config, &files).await
        }
        Commands::Reset => reset_store(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_gateway(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let radio = HostRadio::from_section(&config.radio).await?;
    info!(store = %config.radio.store_dir.display(), "Host radio ready");

    let buttons = PendingEvent::new();
    spawn_console_buttons(buttons.clone());

    let peripherals = Peripherals {
        display: Box::new(LogDisplay),
        indicator: Box::new(LogIndicator::default()),
        sensors: Box::new(SimulatedSensors::new()),
    };
    let error_pause = config.timing.error_display();
    let mut device = Device::new(radio, peripherals, buttons, config);
    device.boot().await;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Device running; type a, b, c (short) or A, B, C (long) to press buttons");

    loop {
        let outcome = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                None
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                None
            }
            outcome = device.tick() => Some(outcome),
        };

        match outcome {
            None => break,
            Some(Ok(TickOutcome::Continue)) => {}
            Some(Ok(TickOutcome::Restart)) => device.reboot().await,
            Some(Err(e)) => {
                error!("Tick failed: {}", e);
                sleep(error_pause).await;
            }
        }
    }

    let radio = device.transport_mut();
    radio.disconnect_mqtt().await;
    radio.disconnect_wifi().await;
    Ok(())
}

/// Turn console lines into button presses
fn spawn_console_buttons(buttons: PendingEvent) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_console_input(&line) {
                    Some(event) => {
                        debug!(?event, "Console button");
                        buttons.set(event);
                    }
                    None => warn!(input = %line.trim(), "Unknown button"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Console input closed: {}", e);
                    break;
                }
            }
        }
    });
}

fn handle_config_command(
    config: &GatewayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current gateway configuration:");
        println!("{}", config.to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn upload_files(
    config: &GatewayConfig,
    files: &[(&str, Option<PathBuf>)],
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::new(&config.radio.store_dir);
    let mut uploaded = 0;

    for (target, source) in files {
        let Some(source) = source else {
            continue;
        };
        let contents = read_source(source).await?;
        if *target == paths::CONFIG_FILE {
            parse_configuration(&contents)
                .map_err(|e| format!("{} is not a valid device configuration: {e}", source.display()))?;
        }
        store.write(target, &contents).await?;
        info!(target = %target, source = %source.display(), "File uploaded");
        uploaded += 1;
    }

    if uploaded == 0 {
        return Err("nothing to upload".into());
    }
    Ok(())
}

async fn read_source(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()).into())
}

async fn reset_store(config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::new(&config.radio.store_dir);
    for path in FACTORY_RESET_FILES {
        match store.delete(path).await {
            Ok(()) => info!(path, "Deleted"),
            Err(TransportError::FileNotFound(_)) => debug!(path, "Not present"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
