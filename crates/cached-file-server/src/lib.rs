//! In-memory caching layer for a static file server
//!
//! Rendered responses (body plus headers) are kept in memory keyed by the
//! request path, with independent plain and gzip variants, a per-entry byte
//! cap, and a background sweep that evicts entries past their TTL.

pub mod cache;
pub mod capture;
pub mod error;
pub mod file_server;
pub mod gzip;
pub mod server;
pub mod sweeper;
pub mod types;

pub use cache::CacheStore;
pub use capture::{CaptureBuffer, ResponseCapture};
pub use error::{FileServerError, Result};
pub use file_server::{CacheService, FileServer};
pub use gzip::{accepts_gzip, GzipBody, GzipVariantResolver};
pub use sweeper::EvictionSweeper;
pub use types::{CacheKey, CacheStats, CachedEntry, FileServerOptions, ServerConfig, Variant};
