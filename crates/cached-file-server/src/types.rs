//! Core types for the cached file server

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_MAX_BYTES_PER_ENTRY: usize = 10_000_000; // 10 MB
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(10 * 60);

/// Which encoding of a path's body an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Plain,
    Gzip,
}

/// Lookup key: the request path with the route prefix removed, plus the variant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: String,
    pub variant: Variant,
}

impl CacheKey {
    pub fn plain(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            variant: Variant::Plain,
        }
    }

    pub fn gzip(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            variant: Variant::Gzip,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            Variant::Plain => write!(f, "{}", self.path),
            Variant::Gzip => write!(f, "{}+gzip", self.path),
        }
    }
}

/// A rendered response body and the headers the origin wrote with it
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub content: Bytes,
    pub headers: HeaderMap,
    pub inserted_at: Instant,
}

impl CachedEntry {
    pub fn new(content: Bytes, headers: HeaderMap) -> Self {
        Self {
            content,
            headers,
            inserted_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Construction-time options for a [`crate::FileServer`]
#[derive(Debug, Clone)]
pub struct FileServerOptions {
    /// Skip the cache entirely; every request goes to the origin
    pub disable_cache: bool,
    /// Responses of this many bytes or more are never stored
    pub max_bytes_per_entry: usize,
    /// How often the sweeper scans the store; zero means the default
    pub sweep_interval: Duration,
    /// Entries older than this are evicted by the next sweep
    pub entry_ttl: Duration,
}

impl Default for FileServerOptions {
    fn default() -> Self {
        Self {
            disable_cache: false,
            max_bytes_per_entry: DEFAULT_MAX_BYTES_PER_ENTRY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            entry_ttl: DEFAULT_ENTRY_TTL,
        }
    }
}

impl FileServerOptions {
    pub fn with_disable_cache(mut self, disable: bool) -> Self {
        self.disable_cache = disable;
        self
    }

    pub fn with_max_bytes_per_entry(mut self, max_bytes: usize) -> Self {
        self.max_bytes_per_entry = max_bytes;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }
}

/// Configuration for the standalone server binary
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub serve_dir: PathBuf,
    pub route: String,
    pub options: FileServerOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 1113,
            serve_dir: PathBuf::from("."),
            route: "/static/".to_string(),
            options: FileServerOptions::default(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = FileServerOptions::default();
        assert!(!options.disable_cache);
        assert_eq!(options.max_bytes_per_entry, 10_000_000);
        assert_eq!(options.sweep_interval, Duration::from_secs(60));
        assert_eq!(options.entry_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_option_setters() {
        let options = FileServerOptions::default()
            .with_disable_cache(true)
            .with_max_bytes_per_entry(3)
            .with_sweep_interval(Duration::from_secs(1))
            .with_entry_ttl(Duration::from_secs(5));
        assert!(options.disable_cache);
        assert_eq!(options.max_bytes_per_entry, 3);
        assert_eq!(options.sweep_interval, Duration::from_secs(1));
        assert_eq!(options.entry_ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 1113);
        assert_eq!(config.serve_dir, PathBuf::from("."));
        assert_eq!(config.route, "/static/");
    }

    #[test]
    fn test_cache_key_variants_are_distinct() {
        let plain = CacheKey::plain("/a.txt");
        let gzip = CacheKey::gzip("/a.txt");
        assert_ne!(plain, gzip);
        assert_eq!(plain.to_string(), "/a.txt");
        assert_eq!(gzip.to_string(), "/a.txt+gzip");
    }

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            uptime_secs: 3600,
            cache: CacheStats {
                entries: 4,
                total_bytes: 2048,
                hits: 500,
                misses: 50,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("3600"));
        assert!(json.contains("\"total_bytes\":2048"));
    }
}
