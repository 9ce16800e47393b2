//! Tidepool CLI - Command-line interface for pool/spa automation controllers
//!
//! Watch a controller's object model live, run named queries and write
//! parameter values from the command line.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tidepool_client::{
    ClientError, ConnectionSupervisor, Controller, ControllerConfig, EventSink, ModelController,
};
use tidepool_core::{DeviceObject, ObjectModel, DEFAULT_PORT};

/// Tidepool - pool/spa automation controller client
#[derive(Parser)]
#[command(name = "tidepool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a controller and print object changes as they happen
    Watch {
        /// Controller hostname or address
        #[arg(short = 'H', long)]
        host: String,

        /// Controller port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Seconds between reconnect attempts
        #[arg(long, default_value = "30")]
        base_delay: u64,
    },

    /// Run a named query and print its answer
    Query {
        /// Controller hostname or address
        #[arg(short = 'H', long)]
        host: String,

        /// Controller port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Query name (GetCircuitNames, GetHardwareDefinition, ...)
        name: String,

        /// Query arguments
        #[arg(default_value = "")]
        arguments: String,
    },

    /// Write one attribute value on an object
    Set {
        /// Controller hostname or address
        #[arg(short = 'H', long)]
        host: String,

        /// Controller port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Object name (objnam)
        objnam: String,

        /// Attribute to write
        attribute: String,

        /// New value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level)?;

    match cli.command {
        Commands::Watch {
            host,
            port,
            base_delay,
        } => watch(&host, port, base_delay).await,
        Commands::Query {
            host,
            port,
            name,
            arguments,
        } => query(&host, port, &name, &arguments).await,
        Commands::Set {
            host,
            port,
            objnam,
            attribute,
            value,
        } => set(&host, port, &objnam, &attribute, &value).await,
    }
}

fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    Ok(())
}

fn config_for(port: u16) -> ControllerConfig {
    ControllerConfig {
        port,
        ..Default::default()
    }
}

/// Sink printing lifecycle events and object changes to the terminal.
/// The controller reference is filled in after construction so `started`
/// can dump the inventory.
#[derive(Default)]
struct WatchSink {
    controller: Mutex<Option<Arc<ModelController>>>,
}

#[async_trait]
impl EventSink for WatchSink {
    async fn started(&self) {
        let controller = self.controller.lock().clone();
        let Some(controller) = controller else { return };

        if let Some(info) = controller.system_info() {
            println!(
                "{} connected to {} (version {}, id {})",
                "tidepool".cyan().bold(),
                info.prop_name().yellow(),
                info.sw_version(),
                info.unique_id()
            );
        }
        let model = controller.model();
        println!("{} objects in the model:", model.len());
        for object in model.iter() {
            println!("  {object}");
        }
    }

    async fn reconnected(&self) {
        println!("{} reconnected", "tidepool".cyan().bold());
    }

    async fn disconnected(&self, reason: Option<String>) {
        println!(
            "{} disconnected: {}",
            "tidepool".cyan().bold(),
            reason.as_deref().unwrap_or("closed by peer")
        );
    }

    async fn updated(&self, changed: Vec<DeviceObject>) {
        for object in changed {
            println!("{} {object}", "changed".green());
        }
    }
}

async fn watch(host: &str, port: u16, base_delay: u64) -> Result<()> {
    let sink = Arc::new(WatchSink::default());
    let controller = Arc::new(ModelController::new(
        host,
        ObjectModel::new(),
        sink.clone(),
        config_for(port),
    ));
    *sink.controller.lock() = Some(controller.clone());

    let supervisor = ConnectionSupervisor::new(
        controller,
        sink,
        Duration::from_secs(base_delay),
    );
    supervisor.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    info!("Received shutdown signal");
    supervisor.stop();

    Ok(())
}

/// Bring up a connection for a one-shot command; the empty-model filter
/// keeps the start sequence from mirroring the full inventory.
async fn connect_once(host: &str, port: u16) -> Result<Arc<ModelController>> {
    let controller = Arc::new(ModelController::new(
        host,
        ObjectModel::with_filter(|_| false),
        Arc::new(tidepool_client::NoopSink),
        config_for(port),
    ));
    controller
        .start()
        .await
        .with_context(|| format!("Failed to connect to {host}:{port}"))?;
    Ok(controller)
}

async fn query(host: &str, port: u16, name: &str, arguments: &str) -> Result<()> {
    let controller = connect_once(host, port).await?;
    let answer = controller.base().get_query(name, arguments).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    controller.stop();
    Ok(())
}

async fn set(host: &str, port: u16, objnam: &str, attribute: &str, value: &str) -> Result<()> {
    let controller = connect_once(host, port).await?;
    let mut changes = HashMap::new();
    changes.insert(attribute.to_string(), value.to_string());

    match controller.request_changes(objnam, &changes, true).await {
        Ok(_) => println!(
            "{} {} {} = {}",
            "tidepool".cyan().bold(),
            objnam.yellow(),
            attribute,
            value
        ),
        Err(ClientError::Command(status)) => {
            anyhow::bail!("controller rejected the write with status {status}")
        }
        Err(err) => return Err(err.into()),
    }
    controller.stop();
    Ok(())
}
