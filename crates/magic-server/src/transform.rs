//! Response rewriting middleware.
//!
//! Buffers the complete body of an eligible response, hands it to a
//! [`ResponseTransform`], and sends whatever the transform returns with a
//! corrected `content-length`.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::StreamExt;

use crate::site::is_page_path;

/// Errors a transform can report.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Transform failed for {path}: {message}")]
    Failed { path: String, message: String },
}

/// A rewrite applied to buffered responses.
pub trait ResponseTransform: Send + Sync + 'static {
    /// Whether the response to `request` should be intercepted.
    ///
    /// Defaults to pages: paths ending in `/` or `.html`.
    fn filter(&self, request: &Request) -> bool {
        is_page_path(request.uri().path())
    }

    /// Rewrite the full response body for `path`.
    ///
    /// `Ok(None)` sends the original body unchanged.
    fn transform(
        &self,
        path: String,
        body: Bytes,
    ) -> impl Future<Output = Result<Option<Bytes>, TransformError>> + Send;
}

/// Accumulates the chunks of a response body until it is ended.
///
/// Writes after `end` are refused, and a second `end` is a no-op.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    chunks: Vec<Bytes>,
    ended: bool,
}

impl ResponseBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns `false` once the buffer has been ended.
    pub fn write(&mut self, chunk: Bytes) -> bool {
        if self.ended {
            return false;
        }
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        true
    }

    /// Mark the body complete. Returns `false` if it was already ended.
    pub fn end(&mut self) -> bool {
        if self.ended {
            return false;
        }
        self.ended = true;
        true
    }

    /// Whether `end` has been called.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// The buffered body as one contiguous value.
    pub fn into_bytes(self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.into_iter().next().unwrap_or_default(),
            _ => self.chunks.concat().into(),
        }
    }
}

/// Middleware entry point; install with `axum::middleware::from_fn_with_state`.
///
/// Only successful responses are rewritten. A failing transform is logged and
/// answered with `500` so the response always completes.
pub async fn transform_response<T: ResponseTransform>(
    State(transform): State<Arc<T>>,
    request: Request,
    next: Next,
) -> Response {
    if !transform.filter(&request) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();

    let mut buffer = ResponseBuffer::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                buffer.write(chunk);
            }
            Err(e) => {
                tracing::error!("{}", TransformError::Body(format!("{}: {}", path, e)));
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    buffer.end();
    let original = buffer.into_bytes();

    let body = match transform.transform(path, original.clone()).await {
        Ok(Some(replacement)) => replacement,
        Ok(None) => original,
        Err(e) => {
            tracing::error!("{}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    Response::from_parts(parts, Body::from(body))
}
