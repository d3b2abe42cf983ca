//! Tee of an origin response body into a bounded in-memory buffer
//!
//! [`ResponseCapture`] sits between the origin's body and whatever consumes
//! it (the gzip encoder or the connection). Every frame is passed along
//! untouched; data frames are also copied into a [`CaptureBuffer`] until the
//! per-entry cap would be reached. When the body is complete and the buffer
//! never overflowed, the bytes are promoted into the store.
//!
//! Completion is detected on the frame that carries the last byte (the
//! declared Content-Length is reached, or the inner body reports its end).
//! hyper stops polling a length-delimited body once all declared bytes are
//! written, so the trailing `None` poll cannot be relied on.

use crate::cache::CacheStore;
use crate::types::{CacheKey, CachedEntry};
use axum::body::Bytes;
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use axum::BoxError;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::debug;

/// Per-request accumulator with an overflow latch
#[derive(Debug)]
pub struct CaptureBuffer {
    bytes: Vec<u8>,
    max_bytes: usize,
    overflow: bool,
}

impl CaptureBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max_bytes,
            overflow: false,
        }
    }

    /// Append `chunk` if the total stays strictly under the cap.
    ///
    /// Once a chunk does not fit, the buffer is marked overflowed and ignores
    /// everything after it.
    pub fn record(&mut self, chunk: &[u8]) -> bool {
        if self.overflow {
            return false;
        }
        if self.bytes.len() + chunk.len() < self.max_bytes {
            self.bytes.extend_from_slice(chunk);
            true
        } else {
            self.overflow = true;
            self.bytes = Vec::new();
            false
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// The captured bytes, or `None` if the cap was hit
    pub fn into_bytes(self) -> Option<Bytes> {
        if self.overflow {
            None
        } else {
            Some(Bytes::from(self.bytes))
        }
    }
}

/// Where a finished capture goes
#[derive(Debug)]
pub struct Promotion {
    store: Arc<CacheStore>,
    key: CacheKey,
    headers: HeaderMap,
}

impl Promotion {
    pub fn new(store: Arc<CacheStore>, key: CacheKey, headers: HeaderMap) -> Self {
        Self {
            store,
            key,
            headers,
        }
    }

    /// Length declared by the origin, if any
    fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    fn complete(self, buffer: CaptureBuffer) {
        match buffer.into_bytes() {
            Some(content) => {
                self.store.put(self.key, CachedEntry::new(content, self.headers));
            }
            None => {
                debug!(key = %self.key, "Response exceeded per-entry cap, not caching");
            }
        }
    }
}

/// Body decorator that forwards every frame and records data frames
pub struct ResponseCapture<B> {
    inner: B,
    buffer: Option<CaptureBuffer>,
    promotion: Option<Promotion>,
    expected: Option<u64>,
    seen: u64,
}

impl<B: HttpBody> ResponseCapture<B> {
    pub fn new(inner: B, max_bytes: usize, promotion: Promotion) -> Self {
        let expected = promotion
            .content_length()
            .or_else(|| inner.size_hint().exact());
        let mut capture = Self {
            inner,
            buffer: Some(CaptureBuffer::new(max_bytes)),
            promotion: Some(promotion),
            expected,
            seen: 0,
        };
        // an empty body may never be polled at all
        if capture.is_complete() {
            capture.finish();
        }
        capture
    }

    fn is_complete(&self) -> bool {
        self.expected == Some(self.seen) || self.inner.is_end_stream()
    }
}

impl<B> ResponseCapture<B> {
    fn finish(&mut self) {
        if let (Some(promotion), Some(buffer)) = (self.promotion.take(), self.buffer.take()) {
            promotion.complete(buffer);
        }
    }

    fn abandon(&mut self) {
        if let Some(promotion) = self.promotion.take() {
            debug!(key = %promotion.key, "Origin body failed, discarding capture");
        }
        self.buffer = None;
    }
}

impl<B> HttpBody for ResponseCapture<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.seen += data.len() as u64;
                    if let Some(buffer) = this.buffer.as_mut() {
                        buffer.record(data);
                    }
                }
                if this.promotion.is_some() && this.is_complete() {
                    this.finish();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                this.abandon();
                Poll::Ready(Some(Err(e.into())))
            }
            None => {
                // a body ending short of its declared length is truncated
                match this.expected {
                    Some(expected) if expected != this.seen => this.abandon(),
                    _ => this.finish(),
                }
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        // not finished while the capture is still pending
        self.promotion.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
