//! Pluggable HTTP transport
//!
//! The engine speaks to the network only through [`Transport`]. The default
//! implementation is [`ReqwestTransport`]; tests and embedders can substitute
//! their own. Transports never follow redirects and never apply a
//! whole-request timeout; the engine owns both.

mod client;
mod resilience;
pub mod tls;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use url::Url;

pub use reqwest::header::HeaderMap;
pub use reqwest::{Method, StatusCode, Version};

pub use self::client::{ReqwestTransport, TransportSettings};
pub use self::resilience::{
    BreakerState, CircuitBreaker, CircuitBreakerTransport, RateLimitedTransport, RateLimiter,
};
pub use crate::config::UploadStream;

/// Response body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

pub enum OutboundBody {
    Empty,
    Bytes(Bytes),
    Stream(UploadStream),
}

impl fmt::Debug for OutboundBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundBody::Empty => f.write_str("Empty"),
            OutboundBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            OutboundBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// One request as handed to a transport.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: OutboundBody,
}

/// Response head plus a streaming body.
pub struct TransportResponse {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: BodyStream,
}

impl TransportResponse {
    /// A fully buffered response; handy for test doubles.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, url: Url, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            version: Version::HTTP_11,
            headers,
            url,
            body: Box::pin(futures::stream::once(async move { Ok(body) })),
        }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &crate::redact::sanitize(&self.url))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Tls,
    Proxy,
    Body,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Proxy => "proxy",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "transport",
        })
    }
}

/// A transport-level failure. Every kind is retryable by the retry controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        (**self).send(request).await
    }
}
