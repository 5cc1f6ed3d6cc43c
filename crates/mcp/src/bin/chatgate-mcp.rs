// Standalone MCP server binary

use anyhow::{Context, Result};
use chatgate_core::{FileExportSink, HttpSessionProvider};
use chatgate_mcp::config::ServerConfig;
use chatgate_mcp::tools::{chat_tools, Dispatcher};
use chatgate_mcp::McpServer;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "chatgate-mcp")]
#[command(about = "MCP server exposing chat dialogs and messages as tools", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "chatgate.toml")]
    config: PathBuf,

    /// Directory for exported files (overrides export.output_dir)
    #[arg(long, env = "CHATGATE_EXPORT_DIR")]
    export_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "chatgate=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::info!("Chatgate MCP Server starting...");

    let config = ServerConfig::load(&args.config)?;
    tracing::debug!(?config, "Configuration loaded");

    let gateway = config.gateway_config()?;
    tracing::info!("Gateway: {}", gateway.base_url);
    let sessions = Arc::new(
        HttpSessionProvider::new(gateway).context("Failed to create session provider")?,
    );

    let export_dir = args.export_dir.unwrap_or(config.export.output_dir);
    tracing::info!("Export directory: {}", export_dir.display());
    let sink = Arc::new(FileExportSink::new(export_dir));

    // Registration happens once, here; the registry is read-only from now on
    let registry = chat_tools(sessions, sink).context("Invalid tool set")?;
    tracing::info!("Registered {} tools", registry.len());

    let server = McpServer::new(Dispatcher::new(registry));
    server.start().await?;

    Ok(())
}
