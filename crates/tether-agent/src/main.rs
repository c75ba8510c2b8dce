//! # tether
//!
//! Runs the push-channel server, or talks to one from the command line.

#![deny(unsafe_code)]

mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tether_client::{ClientConfig, PushChannelClient};
use tether_core::logging::init_subscriber;
use tether_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use tether_server::{ServerConfig, TetherServer};
use tether_settings::{ServerSettings, TetherSettings};

use crate::tools::BuiltinTools;

/// Split-channel JSON-RPC server and client.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Split-channel JSON-RPC server and client")]
struct Cli {
    /// Log filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until Ctrl-C.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// Partition tag announced to clients.
        #[arg(long)]
        partition: Option<String>,
    },
    /// List the tools a server offers.
    Tools {
        /// Server base URL.
        #[arg(long)]
        url: Option<String>,
    },
    /// Call one tool and print its result.
    Call {
        /// Server base URL.
        #[arg(long)]
        url: Option<String>,
        /// Tool name.
        name: String,
        /// Tool arguments as a JSON object.
        #[arg(long)]
        args: Option<String>,
    },
}

fn server_settings(base: &ServerSettings, host: Option<String>, port: Option<u16>, partition: Option<String>) -> ServerSettings {
    ServerSettings {
        host: host.unwrap_or_else(|| base.host.clone()),
        port: port.unwrap_or(base.port),
        partition: partition.unwrap_or_else(|| base.partition.clone()),
        ..base.clone()
    }
}

fn parse_args(args: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = args else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    anyhow::ensure!(value.is_object(), "--args must be a JSON object");
    Ok(Some(value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (settings, settings_err) = match tether_settings::load_settings() {
        Ok(settings) => (settings, None),
        Err(e) => (TetherSettings::default(), Some(e)),
    };
    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    init_subscriber(level, settings.logging.format);
    if let Some(e) = settings_err {
        tracing::warn!(error = %e, path = %tether_settings::settings_path().display(), "ignoring unreadable settings file");
    }

    match cli.command {
        Command::Serve { host, port, partition } => {
            let config = ServerConfig::from(&server_settings(&settings.server, host, port, partition));
            serve(config).await
        }
        Command::Tools { url } => {
            let url = url.unwrap_or_else(|| settings.client.base_url.clone());
            let client = connect(&url, &settings).await?;
            let tools = client.list_tools().await;
            client.close();
            println!("{}", serde_json::to_string_pretty(&tools?)?);
            Ok(())
        }
        Command::Call { url, name, args } => {
            let arguments = parse_args(args.as_deref())?;
            let url = url.unwrap_or_else(|| settings.client.base_url.clone());
            let client = connect(&url, &settings).await?;
            let result = client.call_tool(&name, arguments).await;
            client.close();
            println!("{}", serde_json::to_string_pretty(&result?)?);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let server = TetherServer::with_tools(config, Arc::new(BuiltinTools));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        partition = %server.config().partition,
        methods = server.router().methods().len(),
        "tether listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown(Some(DEFAULT_SHUTDOWN_TIMEOUT)).await {
        tracing::warn!("background tasks did not stop in time");
    }
    if tokio::time::timeout(DEFAULT_SHUTDOWN_TIMEOUT, handle).await.is_err() {
        tracing::warn!("http server did not drain in time");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn connect(url: &str, settings: &TetherSettings) -> Result<PushChannelClient> {
    let client = PushChannelClient::http(url, ClientConfig::from(&settings.client))?;
    client
        .open()
        .await
        .with_context(|| format!("Failed to open channel to {url}"))?;
    let init = client.initialize().await.context("initialize failed")?;
    tracing::debug!(
        server = %init.server_info.name,
        version = %init.server_info.version,
        channel_id = client.channel_id().as_deref(),
        "connected"
    );
    Ok(client)
}
