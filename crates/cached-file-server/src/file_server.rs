//! Caching file server: per-request dispatch in front of an origin service
//!
//! The origin is any tower service that renders a full response for a path
//! with the route prefix already removed, typically
//! [`tower_http::services::ServeDir`]. Rendered bodies are kept in a
//! [`CacheStore`] in plain form; the gzip form is derived from the plain one
//! the first time a gzip-capable client finds it cached.

use crate::cache::CacheStore;
use crate::capture::{Promotion, ResponseCapture};
use crate::error::Result;
use crate::gzip::{accepts_gzip, GzipBody, GzipVariantResolver};
use crate::sweeper::EvictionSweeper;
use crate::types::{CacheKey, CacheStats, CachedEntry, FileServerOptions};
use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderValue, Method, Request, Response, StatusCode, Uri};
use axum::BoxError;
use http_body::Body as HttpBody;
use std::convert::Infallible;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

/// State shared by every clone of the request handler
struct Shared {
    route: String,
    options: FileServerOptions,
    store: Arc<CacheStore>,
    resolver: GzipVariantResolver,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// An origin service fronted by an in-memory response cache.
///
/// Owns the store and its eviction sweeper. Dropping the server (or calling
/// [`FileServer::shutdown`]) stops the sweeper; handlers obtained from
/// [`FileServer::handle`] keep serving from whatever is still cached.
pub struct FileServer<S> {
    shared: Arc<Shared>,
    origin: S,
    sweeper: Option<EvictionSweeper>,
}

impl FileServer<ServeDir> {
    /// Serve files under `dir` at `route`; must be called within a tokio runtime
    pub fn serve_dir(
        route: impl Into<String>,
        dir: impl AsRef<Path>,
        options: FileServerOptions,
    ) -> Self {
        Self::new(route, ServeDir::new(dir), options)
    }
}

impl<S> FileServer<S> {
    /// Wrap `origin`; must be called within a tokio runtime when caching is on
    pub fn new(route: impl Into<String>, origin: S, options: FileServerOptions) -> Self {
        let route = route.into();
        let store = Arc::new(CacheStore::new());

        let sweeper = if options.disable_cache {
            None
        } else {
            Some(EvictionSweeper::start(
                Arc::clone(&store),
                options.sweep_interval,
                options.entry_ttl,
            ))
        };

        info!(
            route = %route,
            caching = !options.disable_cache,
            max_bytes_per_entry = options.max_bytes_per_entry,
            "File server created"
        );

        Self {
            shared: Arc::new(Shared {
                route,
                options,
                store,
                resolver: GzipVariantResolver::default(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
            origin,
            sweeper,
        }
    }

    /// A request handler bindable into a router at the configured route
    pub fn handle(&self) -> CacheService<S>
    where
        S: Clone,
    {
        CacheService {
            shared: Arc::clone(&self.shared),
            origin: self.origin.clone(),
        }
    }

    /// Drop every cached entry
    pub fn flush(&self) -> Result<()> {
        let entries = self.shared.store.len();
        self.shared.store.clear();
        info!(entries, "Flushed response cache");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.shared.store.len(),
            total_bytes: self.shared.store.total_bytes(),
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.shared.store
    }

    pub fn route(&self) -> &str {
        &self.shared.route
    }

    /// Stop the eviction sweeper and wait for it to exit
    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.stop().await;
        }
    }
}

/// Tower service performing cache lookup, origin fallback and capture
pub struct CacheService<S> {
    shared: Arc<Shared>,
    origin: S,
}

impl<S: Clone> Clone for CacheService<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            origin: self.origin.clone(),
        }
    }
}

impl<S, ResBody> Service<Request<Body>> for CacheService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Response<Body>, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
        self.origin.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // hand the readied origin to this call, keep a fresh clone for the next
        let clone = self.origin.clone();
        let origin = std::mem::replace(&mut self.origin, clone);
        let shared = Arc::clone(&self.shared);
        Box::pin(async move { Ok(shared.dispatch(origin, req).await) })
    }
}

impl Shared {
    async fn dispatch<S, ResBody>(&self, mut origin: S, req: Request<Body>) -> Response<Body>
    where
        S: Service<Request<Body>, Response = Response<ResBody>, Error = Infallible>,
        ResBody: HttpBody<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<BoxError>,
    {
        let (mut parts, body) = req.into_parts();
        let path = strip_route(&self.route, parts.uri.path());
        let do_gzip = accepts_gzip(&parts.headers);
        let cacheable = !self.options.disable_cache && parts.method == Method::GET;

        if cacheable {
            if let Some(response) = self.serve_cached(&path, do_gzip).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return response;
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        debug!(path = %path, gzip = do_gzip, "Forwarding to origin");
        parts.uri = rewrite_path(&parts.uri, &path);
        let response = match origin.call(Request::from_parts(parts, body)).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        self.wrap_origin_response(path, response, do_gzip, cacheable)
    }

    /// Replay a cached variant, deriving gzip from plain when needed
    async fn serve_cached(&self, path: &str, do_gzip: bool) -> Option<Response<Body>> {
        if do_gzip {
            if let Some(entry) = self.store.get(&CacheKey::gzip(path)) {
                debug!(path, "Cache hit (gzip)");
                return Some(replay(&entry, true));
            }
        }

        let plain = self.store.get(&CacheKey::plain(path))?;
        debug!(path, "Cache hit (plain)");

        if do_gzip {
            match self.resolver.derive(Arc::clone(&plain)).await {
                Ok(derived) => {
                    let derived = self.store.put(CacheKey::gzip(path), derived);
                    return Some(replay(&derived, true));
                }
                Err(e) => {
                    warn!(path, error = %e, "Failed to derive gzip variant, serving plain");
                }
            }
        }

        Some(replay(&plain, false))
    }

    /// Chain `origin body -> capture -> gzip` as configured for this request
    fn wrap_origin_response<ResBody>(
        &self,
        path: String,
        response: Response<ResBody>,
        do_gzip: bool,
        cacheable: bool,
    ) -> Response<Body>
    where
        ResBody: HttpBody<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<BoxError>,
    {
        let (mut parts, body) = response.into_parts();
        let mut body = Body::new(body);

        // a body the origin already encoded is neither cached nor re-encoded
        let already_encoded = parts.headers.contains_key(CONTENT_ENCODING);

        if cacheable && parts.status == StatusCode::OK && !already_encoded {
            let promotion = Promotion::new(
                Arc::clone(&self.store),
                CacheKey::plain(path),
                parts.headers.clone(),
            );
            body = Body::new(ResponseCapture::new(
                body,
                self.options.max_bytes_per_entry,
                promotion,
            ));
        }

        if do_gzip && !already_encoded {
            parts.headers.remove(CONTENT_LENGTH);
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            body = Body::new(GzipBody::new(body));
        }

        Response::from_parts(parts, body)
    }
}

/// Build a 200 response from a cached entry.
///
/// Every stored header value is replayed except Content-Encoding, which is
/// set from the variant served, empty values, and Content-Length, which is
/// recomputed from the body.
fn replay(entry: &CachedEntry, gzip: bool) -> Response<Body> {
    let mut response = Response::new(Body::from(entry.content.clone()));
    let headers = response.headers_mut();

    for (name, value) in entry.headers.iter() {
        if *name == CONTENT_ENCODING || *name == CONTENT_LENGTH || value.is_empty() {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if gzip {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(entry.content.len()));

    response
}

/// Remove the route prefix, keeping the result rooted at `/`.
///
/// The prefix only matches on a segment boundary, so `/static` and
/// `/static/` both map to `/` while `/staticfoo` is left alone.
fn strip_route(route: &str, path: &str) -> String {
    let prefix = route.trim_end_matches('/');
    let stripped = match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    };
    if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{}", stripped)
    }
}

/// Swap the URI's path for `path`, keeping any query string
fn rewrite_path(uri: &Uri, path: &str) -> Uri {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    match Uri::try_from(path_and_query) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            warn!(uri = %uri, error = %e, "Could not rewrite request path");
            uri.clone()
        }
    }
}
