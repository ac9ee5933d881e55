//! Playout engine - Main entry point
//!
//! Starts the process supervisor with every configured channel, a console
//! hardware controller on stdin, and log sinks standing in for the WebSocket
//! and UI destinations. `playout inspect` prints persisted snapshots without
//! touching them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use playout_common::config::{resolve_root_folder, LoggingConfig, TomlConfig};
use playout_common::state_store::read_snapshot;
use serde_json::Value;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use playout_engine::channel::state_name;
use playout_engine::files::FileLifecycle;
use playout_engine::hardware::{ConsoleController, ControllerInput, HardwareController};
use playout_engine::plan_source::JsonPlanSource;
use playout_engine::router::{Routed, RouterOutputs, RouterReceivers};
use playout_engine::server::SERVER_STATE_NAME;
use playout_engine::supervisor::{simulated_engines, SupervisorConfig};
use playout_engine::ProcessSupervisor;

/// How often dead units are collected
const REAP_INTERVAL: Duration = Duration::from_millis(500);

/// Command-line arguments for playout
#[derive(Parser, Debug)]
#[command(name = "playout")]
#[command(about = "Broadcast playout control core")]
#[command(version)]
struct Cli {
    /// Path to playout.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root folder containing media, show plans and state
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start all channels (default)
    Run {
        /// Override the configured number of channels
        #[arg(long)]
        channels: Option<u8>,
    },
    /// Print persisted state snapshots
    Inspect {
        /// Only this channel
        #[arg(long)]
        channel: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) =
        TomlConfig::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging)?;
    source.log();
    let root_folder = resolve_root_folder(cli.root_folder.as_deref(), &config);

    match cli.command {
        None => run(config, &root_folder, None).await,
        Some(Commands::Run { channels }) => run(config, &root_folder, channels).await,
        Some(Commands::Inspect { channel }) => inspect(&config, &root_folder, channel),
    }
}

/// `RUST_LOG` wins over the configured level
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "playout={0},playout_engine={0},playout_common={0}",
            logging.level
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
                .init();
        }
        None => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
    Ok(())
}

async fn run(mut config: TomlConfig, root_folder: &Path, channels: Option<u8>) -> Result<()> {
    if let Some(channels) = channels {
        config.channels = channels;
        config.validate().context("Invalid --channels")?;
    }

    info!(
        "Starting playout {} (git {}, built {}, {} profile)",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Root folder: {}", root_folder.display());
    std::fs::create_dir_all(root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let settings = SupervisorConfig::from_toml(&config, root_folder);
    let plan_source = Arc::new(JsonPlanSource::new(root_folder));
    let mut supervisor = ProcessSupervisor::new(settings, simulated_engines(), plan_source);

    let (outputs, receivers) = RouterOutputs::channel(config.queue_capacity);
    let RouterReceivers {
        websocket,
        ui,
        controller,
        file_lifecycle,
    } = receivers;
    let shutdown = supervisor.shutdown_signal();

    tokio::spawn(log_destination("websocket", websocket, shutdown.clone()));
    tokio::spawn(log_destination("ui", ui, shutdown.clone()));
    tokio::spawn(FileLifecycle::new(root_folder).run(file_lifecycle, shutdown.clone()));

    let hardware: Box<dyn HardwareController> = Box::new(ConsoleController);
    info!("Hardware controller: {}", hardware.name());
    let mut inputs = hardware.start(controller, shutdown.clone());

    supervisor.start(outputs).context("Failed to start channels")?;

    let mut reap = time::interval(REAP_INTERVAL);
    let mut inputs_open = true;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            input = inputs.recv(), if inputs_open => match input {
                Some(ControllerInput { channel, message }) => {
                    if let Err(e) = supervisor.send(channel, &message) {
                        warn!("Command for channel {} not delivered: {}", channel, e);
                    }
                }
                None => inputs_open = false,
            },
            _ = reap.tick() => {
                supervisor.reap().await;
                if supervisor.running_channels() == 0 {
                    info!("All channels have stopped");
                    break;
                }
            }
        }
    }

    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Sink for a destination with no transport attached
async fn log_destination(
    name: &'static str,
    mut messages: mpsc::Receiver<Routed>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            msg = messages.recv() => match msg {
                Some(routed) => debug!("{} <- channel {}: {}", name, routed.channel, routed.message),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

fn inspect(config: &TomlConfig, root_folder: &Path, channel: Option<u8>) -> Result<()> {
    let state_dir = config.state_dir(root_folder);
    let names: Vec<String> = match channel {
        Some(channel) => vec![state_name(channel)],
        None => std::iter::once(SERVER_STATE_NAME.to_string())
            .chain((0..config.channels).map(state_name))
            .collect(),
    };

    for name in names {
        match read_snapshot(&state_dir, &name) {
            Ok(state) => println!("{}:\n{}", name, serde_json::to_string_pretty(&Value::Object(state))?),
            Err(e) => println!("{}: no snapshot ({})", name, e),
        }
    }
    Ok(())
}
