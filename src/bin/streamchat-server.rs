// ABOUTME: Server binary wiring configuration, logging, storage, upstream, and HTTP routes
// ABOUTME: Serves the streaming chat endpoint until Ctrl-C
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![recursion_limit = "256"]

//! # Streamchat Server Binary
//!
//! Reads configuration from the environment, opens the database, and serves
//! `POST /api/chat/stream` and `GET /health`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use streamchat_server::{
    config::environment::ServerConfig, logging, resources::ServerResources, routes,
};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "streamchat-server")]
#[command(about = "Streaming LLM chat server with autonomous tool execution")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database.url = database_url;
    }
    info!("{}", config.summary());

    ensure_database_dir(&config.database.url)?;

    let resources = Arc::new(
        ServerResources::from_config(&config)
            .await
            .context("Failed to initialize server resources")?,
    );
    let app = routes::build_router(resources, &config.cors_allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server shut down");
    Ok(())
}

/// Create the parent directory of a file-backed `SQLite` URL
fn ensure_database_dir(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = path.trim_start_matches("//");
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
