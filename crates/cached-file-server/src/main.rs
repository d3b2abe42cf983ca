//! Cached file server - static files served from an in-memory response cache
//!
//! Serves a directory under a route prefix, keeping rendered responses in
//! memory with lazily derived gzip variants.

use cached_file_server::error::Result;
use cached_file_server::server::{start_server, ServerState, SharedState};
use cached_file_server::types::{FileServerOptions, ServerConfig};
use cached_file_server::{FileServer, FileServerError};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("cached_file_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting cached file server...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Serving {:?} at {}", config.serve_dir, config.route);
    info!("Caching enabled: {}", !config.options.disable_cache);
    info!("Max bytes per entry: {}", config.options.max_bytes_per_entry);
    info!(
        "Sweep every {}s, TTL {}s",
        config.options.sweep_interval.as_secs(),
        config.options.entry_ttl.as_secs()
    );

    let file_server = FileServer::serve_dir(config.route, config.serve_dir, config.options);
    let state: SharedState = Arc::new(ServerState::new(file_server));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| FileServerError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn load_config() -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    let default_options = FileServerOptions::default();

    let port = env_or("PORT", defaults.port)?;

    let serve_dir = std::env::var("SERVE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.serve_dir);

    let route = std::env::var("ROUTE").unwrap_or(defaults.route);
    if !route.starts_with('/') {
        return Err(FileServerError::Config(format!(
            "ROUTE must start with '/', got {:?}",
            route
        )));
    }

    let options = FileServerOptions {
        disable_cache: env_or("DISABLE_CACHE", default_options.disable_cache)?,
        max_bytes_per_entry: env_or("MAX_BYTES_PER_ENTRY", default_options.max_bytes_per_entry)?,
        sweep_interval: env_or("SWEEP_INTERVAL_SECS", default_options.sweep_interval.as_secs())
            .map(Duration::from_secs)?,
        entry_ttl: env_or("CACHE_TTL_SECS", default_options.entry_ttl.as_secs())
            .map(Duration::from_secs)?,
    };

    if options.sweep_interval.is_zero() {
        return Err(FileServerError::Config(
            "SWEEP_INTERVAL_SECS must be greater than zero".to_string(),
        ));
    }

    Ok(ServerConfig {
        port,
        serve_dir,
        route,
        options,
    })
}

/// Parse an env var, falling back to `default` when it is unset
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| FileServerError::Config(format!("invalid {}: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}
