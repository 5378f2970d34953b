// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Curator API Server
//!
//! Standalone HTTP server exposing scans, profiles and history as JSON.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use curator::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "curator-web")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Curator JSON API Server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "curator.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Curator API Server v1.0.0");

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(host) = args.host {
        config.web.host = host;
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }

    info!("Store: {}", config.storage.store_path);
    info!("Catalog: {}", config.storage.catalog_path);

    curator::web::start_server(config)
        .await
        .context("API server stopped")?;
    Ok(())
}
