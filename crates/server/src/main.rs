//! mcp-hoard server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use hoard_client::HttpFetcher;
use hoard_core::{AppConfig, ResourceCache};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let fetcher = HttpFetcher::from_config(&config)?;
    let cache = ResourceCache::from_config(&config, fetcher).await?;

    tracing::info!(root = %config.root.display(), name = %config.name, "Starting mcp-hoard server on stdio transport");

    let handler = handler::HoardServer::new(Arc::new(cache));
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
