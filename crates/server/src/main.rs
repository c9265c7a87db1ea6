use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use ibkr_mcp_core::config::{BridgeConfig, ConfigLoader, GatewayConfig};
use ibkr_mcp_gateway::ib::IbGateway;
use ibkr_mcp_gateway::sim::SimGateway;
use ibkr_mcp_gateway::{ConnectionSupervisor, GatewaySession};
use ibkr_mcp_orchestrator::RequestDispatcher;

mod tools;

use tools::{ToolHandler, ToolRequest};

#[derive(Parser)]
#[command(name = "ibkr-mcp")]
#[command(about = "MCP bridge to an Interactive Brokers gateway session", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    config: String,
    /// Serve the built-in simulated gateway instead of a real one
    #[arg(long)]
    sim: bool,
    /// Target the live gateway port instead of paper trading
    #[arg(long)]
    live: bool,
}

/// One request line on the wire: either a tool call or a resource read.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireRequest {
    Resource { resource: String },
    Tool(ToolRequest),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ConfigLoader::load(&cli.config)?;
    if cli.live {
        let live = GatewayConfig::live();
        config.gateway.port = live.port;
        config.gateway.paper = false;
    }

    if cli.sim {
        info!("serving the simulated gateway");
        serve(Arc::new(SimGateway::demo()), &config).await
    } else {
        info!(url = %config.gateway.connection_url(), "serving the IB gateway");
        serve(Arc::new(IbGateway::new(config.gateway.clone())), &config).await
    }
}

async fn serve<S: GatewaySession>(session: Arc<S>, config: &BridgeConfig) -> anyhow::Result<()> {
    let supervisor = Arc::new(ConnectionSupervisor::new(session, config));
    let _loss_watcher = supervisor.spawn_loss_watcher();

    // Connect eagerly, but a gateway that is down at startup does not
    // kill the server. The eager attempt must not consume the
    // automatic budget, so the failure is forgiven and the first tool
    // call retries with a fresh sequence.
    if let Err(err) = supervisor.ensure_connected().await {
        warn!(error = %err, "starting without a gateway connection");
        supervisor.clear_failure().await;
    }

    let dispatcher = Arc::new(RequestDispatcher::new(supervisor, config.timeouts.clone()));
    let handler = ToolHandler::new(dispatcher);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WireRequest>(line) {
            Ok(WireRequest::Tool(request)) => handler.handle(&request).await,
            Ok(WireRequest::Resource { resource }) => handler.read_resource(&resource).await,
            Err(err) => json!({
                "ok": false,
                "error": { "kind": "invalid_request", "message": format!("malformed request: {err}") },
            }),
        };

        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("input closed, shutting down");
    Ok(())
}
