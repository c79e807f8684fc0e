//! worksheet-server
//!
//! Serves interactive code-execution sessions over TCP. Configuration comes
//! from `--config`, the `WORKSHEET_SERVER_CONFIG` env var, or defaults; the
//! `--listen` and `--port-file` flags override it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use worksheet_server::config::Config;
use worksheet_server::kernel::{Kernel, ScriptKernel};
use worksheet_server::server::{self, KernelFactory, Server};

#[derive(Parser, Debug)]
#[command(name = "worksheet-server")]
#[command(about = "Interactive worksheet code-execution server")]
struct Args {
    /// Address to listen on (overrides config and WORKSHEET_LISTEN)
    #[arg(long)]
    listen: Option<String>,

    /// Write the bound port to this file once listening
    #[arg(long)]
    port_file: Option<PathBuf>,

    /// JSON configuration file (instead of WORKSHEET_SERVER_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env().context("Failed to load configuration")?,
    };
    let listen = args.listen.unwrap_or_else(|| config.resolved_listen());
    let port_file = args.port_file.or(config.port_file);

    let factory: KernelFactory = Arc::new(|| -> Box<dyn Kernel> { Box::new(ScriptKernel::new()) });
    let server = Server::bind(&listen, config.lint, factory).await?;
    let addr = server.local_addr()?;
    info!(%addr, lint = ?config.lint, "Listening");

    if let Some(path) = &port_file {
        server::write_port_file(path, addr.port()).await?;
        info!(path = %path.display(), "Wrote port file");
    }

    server
        .serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await
}
