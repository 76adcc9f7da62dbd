//! zipserve - serve files from a directory as on-demand zip archives.
//!
//! `GET /a.txt&b.txt` answers with `archive.zip` holding whichever of the
//! named files exist under the serving root.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use zipserve_core::pool::{WorkerPool, build_runtime};
use zipserve_core::{Config, server};

/// Bundle requested files into a zip archive over HTTP.
#[derive(Parser, Debug)]
#[command(name = "zipserve", author, version, about)]
struct Args {
    /// Config file (defaults to ./zipserve.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and ZIPSERVE_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory to serve files from (overrides config and ZIPSERVE_ROOT)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = &args.log_level;
            format!("zipserve_core={level},zipserve={level},{level}").into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args).context("Failed to load configuration")?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    let runtime = build_runtime(&config.pool).context("Failed to build worker pool")?;
    let pool = Arc::new(WorkerPool::new(runtime.handle().clone()));

    let result = runtime.block_on(server::run(&config, pool, shutdown_signal()));
    if let Err(e) = &result {
        error!(error = %e, "Server error");
    }
    result?;

    info!("Server stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(port) = args.port {
        config.server.address.set_port(port);
    }
    if let Some(root) = &args.root {
        config.archive.root.clone_from(root);
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
