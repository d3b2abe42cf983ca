//! Gzip negotiation, derived cache variants, and streaming encoding

use crate::error::{FileServerError, Result};
use crate::types::CachedEntry;
use axum::body::Bytes;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderValue};
use axum::BoxError;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body::{Body as HttpBody, Frame};
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::debug;

/// Whether the client's Accept-Encoding allows a gzip body.
///
/// Tokens are compared case-insensitively; an explicit `q=0` refuses the
/// coding.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| {
            let mut params = item.split(';');
            let coding = params.next().unwrap_or("").trim();
            if !coding.eq_ignore_ascii_case("gzip") && !coding.eq_ignore_ascii_case("x-gzip") {
                return false;
            }
            !params.any(|param| {
                let param = param.trim();
                param
                    .strip_prefix("q=")
                    .or_else(|| param.strip_prefix("Q="))
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            })
        })
}

/// Compress a complete buffer in one go
pub fn compress(content: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(content.len() / 2), level);
    encoder
        .write_all(content)
        .map_err(|e| FileServerError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| FileServerError::Compression(e.to_string()))
}

/// Builds the gzip variant of a cached plain entry
#[derive(Debug, Clone, Copy)]
pub struct GzipVariantResolver {
    level: Compression,
}

impl Default for GzipVariantResolver {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl GzipVariantResolver {
    pub fn new(level: Compression) -> Self {
        Self { level }
    }

    /// Compress `plain` on the blocking pool.
    ///
    /// The result carries the plain entry's headers with Content-Encoding
    /// forced to gzip and the stale Content-Length dropped. Deriving twice
    /// from the same entry yields equivalent values, so racing writers are
    /// harmless.
    pub async fn derive(&self, plain: Arc<CachedEntry>) -> Result<CachedEntry> {
        let level = self.level;
        let content = plain.content.clone();
        let compressed = tokio::task::spawn_blocking(move || compress(&content, level)).await??;

        let mut headers = plain.headers.clone();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.remove(CONTENT_LENGTH);

        debug!(
            plain_size = plain.len(),
            gzip_size = compressed.len(),
            "Derived gzip variant"
        );
        Ok(CachedEntry::new(Bytes::from(compressed), headers))
    }
}

/// Streams an inner body through a gzip encoder.
///
/// Compressed output is emitted as soon as the encoder produces it; the gzip
/// trailer goes out once the inner body ends. Trailers from the inner body
/// are held back until the encoder has been finished.
pub struct GzipBody<B> {
    inner: B,
    encoder: Option<GzEncoder<Vec<u8>>>,
    trailers: Option<HeaderMap>,
}

impl<B> GzipBody<B> {
    pub fn new(inner: B) -> Self {
        Self::with_level(inner, Compression::default())
    }

    pub fn with_level(inner: B, level: Compression) -> Self {
        Self {
            inner,
            encoder: Some(GzEncoder::new(Vec::new(), level)),
            trailers: None,
        }
    }

    /// Close the encoder, yielding whatever output it still holds
    fn finish_encoder(&mut self) -> Option<std::result::Result<Frame<Bytes>, BoxError>> {
        match self.encoder.take().map(GzEncoder::finish) {
            Some(Ok(out)) if !out.is_empty() => Some(Ok(Frame::data(Bytes::from(out)))),
            Some(Err(e)) => {
                self.trailers = None;
                Some(Err(e.into()))
            }
            _ => self.trailers.take().map(|trailers| Ok(Frame::trailers(trailers))),
        }
    }
}

impl<B> HttpBody for GzipBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
            };

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        if let Err(e) = encoder.write_all(&data) {
                            this.encoder = None;
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        let out = std::mem::take(encoder.get_mut());
                        if !out.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(Bytes::from(out)))));
                        }
                    }
                    Err(frame) => match frame.into_trailers() {
                        // trailers end the body; the gzip footer must precede them
                        Ok(trailers) => {
                            this.trailers = Some(trailers);
                            return Poll::Ready(this.finish_encoder());
                        }
                        Err(frame) => return Poll::Ready(Some(Ok(frame))),
                    },
                },
                Some(Err(e)) => {
                    this.encoder = None;
                    return Poll::Ready(Some(Err(e.into())));
                }
                None => return Poll::Ready(this.finish_encoder()),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none() && self.trailers.is_none()
    }
}
