//! reqwest-backed transport

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::{HeaderValue, HOST};
use tracing::debug;
use url::Url;

use super::tls::{client_config, TlsMaterial};
use super::{
    OutboundBody, OutboundRequest, Transport, TransportError, TransportErrorKind,
    TransportResponse, UploadStream,
};
use crate::config::{HttpVersionPref, TlsOptions};
use crate::error::ExecutionError;

/// Everything that shapes a pooled client. Equal settings share a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportSettings {
    pub proxy: Option<Url>,
    pub tls: TlsOptions,
    pub compressed: bool,
    pub connect_timeout: Option<Duration>,
    pub http_version: HttpVersionPref,
    /// `None` sends no User-Agent
    pub user_agent: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            tls: TlsOptions::default(),
            compressed: false,
            connect_timeout: None,
            http_version: HttpVersionPref::Auto,
            user_agent: Some(crate::engine::DEFAULT_USER_AGENT.to_string()),
        }
    }
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    settings: TransportSettings,
    tls: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(settings: TransportSettings, material: &TlsMaterial) -> Result<Self, ExecutionError> {
        let alpn = match settings.http_version {
            HttpVersionPref::Http1Only => vec![b"http/1.1".to_vec()],
            _ => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        };
        let tls = Arc::new(client_config(&settings.tls, material, alpn)?);
        let client = client_builder(&settings, &tls)?
            .build()
            .map_err(|e| ExecutionError::TlsConfig {
                reason: describe(&e),
            })?;
        debug!(
            proxy = settings.proxy.is_some(),
            compressed = settings.compressed,
            "built HTTP client"
        );
        Ok(Self {
            client,
            settings,
            tls,
        })
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Connect to the URL's host while presenting `sni` in the handshake.
    async fn sni_client(
        &self,
        url: &mut Url,
        headers: &mut reqwest::header::HeaderMap,
        sni: &str,
    ) -> Result<reqwest::Client, TransportError> {
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::new(TransportErrorKind::Other, "URL has no host"))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| TransportError::new(TransportErrorKind::Connect, e.to_string()))?
            .collect();

        if !headers.contains_key(HOST) {
            let authority = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.clone(),
            };
            let value = HeaderValue::from_str(&authority)
                .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
            headers.insert(HOST, value);
        }
        url.set_host(Some(sni))
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;

        client_builder(&self.settings, &self.tls)
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?
            .resolve_to_addrs(sni, &addrs)
            .build()
            .map_err(|e| TransportError::new(TransportErrorKind::Tls, describe(&e)))
    }
}

fn client_builder(
    settings: &TransportSettings,
    tls: &rustls::ClientConfig,
) -> Result<reqwest::ClientBuilder, ExecutionError> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .use_preconfigured_tls(tls.clone());

    if let Some(agent) = &settings.user_agent {
        builder = builder.user_agent(agent.as_str());
    }
    if let Some(timeout) = settings.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder = if settings.compressed {
        builder.gzip(true).brotli(true).deflate(true)
    } else {
        builder.no_gzip().no_brotli().no_deflate()
    };
    builder = match &settings.proxy {
        Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
            ExecutionError::ProxyConfig {
                reason: describe(&e),
            }
        })?),
        // environment proxies would bypass --noproxy decisions
        None => builder.no_proxy(),
    };
    builder = match settings.http_version {
        HttpVersionPref::Http1Only => builder.http1_only(),
        HttpVersionPref::Http2PriorKnowledge => builder.http2_prior_knowledge(),
        HttpVersionPref::Auto | HttpVersionPref::Http2 => builder,
    };
    Ok(builder)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let OutboundRequest {
            method,
            mut url,
            mut headers,
            body,
        } = request;

        let client = match &self.settings.tls.sni {
            Some(sni) => self.sni_client(&mut url, &mut headers, sni).await?,
            None => self.client.clone(),
        };

        let mut builder = client.request(method, url).headers(headers);
        builder = match body {
            OutboundBody::Empty => builder,
            OutboundBody::Bytes(bytes) => builder.body(bytes),
            OutboundBody::Stream(stream) => {
                builder.body(reqwest::Body::wrap_stream(SyncStream(Mutex::new(stream))))
            }
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes_stream().map_err(|e| {
            let mut err = classify(e);
            if err.kind == TransportErrorKind::Other {
                err.kind = TransportErrorKind::Body;
            }
            err
        });

        Ok(TransportResponse {
            status,
            version,
            headers,
            url,
            body: Box::pin(body),
        })
    }
}

/// Upload stream made `Sync` for `Body::wrap_stream`; polling never locks.
struct SyncStream(Mutex<UploadStream>);

impl Stream for SyncStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let stream = match self.get_mut().0.get_mut() {
            Ok(stream) => stream,
            Err(poisoned) => poisoned.into_inner(),
        };
        stream.as_mut().poll_next(cx)
    }
}

/// Map a reqwest error to a kind. URLs are stripped from the message.
fn classify(err: reqwest::Error) -> TransportError {
    let kind = if caused_by_tls(&err) {
        TransportErrorKind::Tls
    } else if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, describe(&err.without_url()))
}

fn caused_by_tls(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.downcast_ref::<rustls::Error>().is_some() {
            return true;
        }
        source = cause.source();
    }
    false
}

/// The error and its causes on one line.
fn describe(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
