//! Execution engine
//!
//! Construct one [`Executor`] and share it; every [`Executor::execute`] call
//! runs sequentially on the caller's task:
//!
//! 1. validate the config and resolve the effective deadline
//! 2. load files and build method, URL, headers and body once
//! 3. pick (or build and cache) a transport for the hop's proxy and TLS setup
//! 4. let the [`RetryController`] drive attempts
//! 5. store cookies, follow redirects, read the body under the size cap
//!
//! The whole pipeline runs inside the deadline's guard, so a cancelled or
//! expired call stops at whichever suspension point it is parked on.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION,
    SET_COOKIE,
};
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::RequestConfig;
use crate::cookies::{self, CookieRecord};
use crate::deadline::{resolve, Cancellation, EffectiveDeadline};
use crate::error::{ExecutionError, KurlError, Result};
use crate::limits::Limits;
use crate::loader::{FsLoader, ResourceLoader};
use crate::prepare::{prepare, Prepared, PreparedBody};
use crate::redact::{redact_headers, sanitize, sanitize_url};
use crate::response::Response;
use crate::retry::RetryController;
use crate::transport::{
    BodyStream, OutboundRequest, ReqwestTransport, Transport, TransportSettings,
};
use crate::validate::validate_with;

pub const DEFAULT_USER_AGENT: &str = concat!("kurl/", env!("CARGO_PKG_VERSION"));

/// Per-call state, dropped when the call returns.
struct ExecutionContext<'a> {
    deadline: &'a EffectiveDeadline,
    attempts: u32,
    redirects: u32,
    cookies: Vec<CookieRecord>,
}

/// Executes [`RequestConfig`]s. Cheap to clone; clones share the transport
/// cache and the cookie jar.
#[derive(Clone)]
pub struct Executor {
    transport: Option<Arc<dyn Transport>>,
    loader: Arc<dyn ResourceLoader>,
    jar: Arc<Jar>,
    limits: Limits,
    user_agent: Option<Arc<str>>,
    max_response_bytes: Option<u64>,
    clients: Arc<DashMap<TransportSettings, Arc<ReqwestTransport>>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("custom_transport", &self.transport.is_some())
            .field("limits", &self.limits)
            .field("cached_clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Cookies received so far, shared by every call on this executor.
    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Run one request to completion.
    #[instrument(
        name = "execute",
        skip_all,
        fields(method = %config.method(), url = %sanitize_url(config.url()))
    )]
    pub async fn execute(&self, config: &RequestConfig, cancel: &Cancellation) -> Result<Response> {
        validate_with(config, &self.limits)?;

        let deadline = resolve(cancel, config.timeouts().total());
        let mut cx = ExecutionContext {
            deadline: &deadline,
            attempts: 0,
            redirects: 0,
            cookies: Vec::new(),
        };
        match deadline.guard(self.run(config, &mut cx)).await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }

    async fn run(&self, config: &RequestConfig, cx: &mut ExecutionContext<'_>) -> Result<Response> {
        let mut prepared = prepare(
            config,
            self.loader.as_ref(),
            &self.limits,
            self.user_agent.as_deref(),
        )
        .await?;
        self.load_cookie_files(config).await?;

        let mut method = prepared.method.clone();
        let mut url = prepared.url.clone();
        let mut headers = prepared.headers.clone();
        let mut body = std::mem::replace(&mut prepared.body, PreparedBody::Empty);
        let mut visited = HashSet::from([format!("{method} {url}")]);
        let max_hops = config.redirect().max_hops();

        loop {
            let transport = self.transport_for(&prepared, config, &url)?;
            let hop_headers = self.with_jar_cookies(&headers, &url);
            debug!(
                method = %method,
                url = %sanitize(&url),
                headers = ?redact_headers(&hop_headers),
                "outbound request"
            );

            let mut controller =
                RetryController::new(config.retry().clone(), body.is_replayable(), sanitize(&url));
            let response = controller
                .run(cx.deadline, |_| {
                    let request = OutboundRequest {
                        method: method.clone(),
                        url: url.clone(),
                        headers: hop_headers.clone(),
                        body: body.next_outbound(),
                    };
                    let transport = Arc::clone(&transport);
                    async move { transport.send(request).await }
                })
                .await?;
            cx.attempts += controller.attempts();
            self.store_cookies(&response.headers, &url, &mut cx.cookies);

            let location = redirect_target(config, response.status, &response.headers, &url)?;
            let Some(next) = location else {
                let body = read_capped(
                    response.body,
                    &response.headers,
                    config.max_response_bytes().or(self.max_response_bytes),
                )
                .await
                .map_err(|err| with_url(err, &url))?;
                debug!(
                    status = response.status.as_u16(),
                    bytes = body.len() as u64,
                    attempts = cx.attempts,
                    redirects = cx.redirects,
                    "request complete"
                );
                return Ok(Response {
                    status: response.status,
                    version: response.version,
                    headers: response.headers,
                    url: response.url,
                    body,
                    attempts: cx.attempts,
                    redirects: cx.redirects,
                    cookies: std::mem::take(&mut cx.cookies),
                });
            };

            if cx.redirects >= max_hops {
                return Err(ExecutionError::RedirectLoopExceeded {
                    max: max_hops,
                    url: sanitize(&next),
                }
                .into());
            }

            if rewrites_to_get(response.status, &method) {
                method = Method::GET;
                body = PreparedBody::Empty;
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            } else if !body.is_replayable() {
                return Err(ExecutionError::Resource {
                    what: "request body".to_string(),
                    reason: format!(
                        "a streamed body cannot be resent to {}",
                        sanitize(&next)
                    ),
                }
                .into());
            }

            if !visited.insert(format!("{method} {next}")) {
                return Err(ExecutionError::RedirectLoopExceeded {
                    max: max_hops,
                    url: sanitize(&next),
                }
                .into());
            }

            if !same_origin_host(&url, &next) && !config.redirect().trusted {
                headers.remove(AUTHORIZATION);
                headers.remove(COOKIE);
            }
            cx.redirects += 1;
            debug!(
                hop = cx.redirects,
                status = response.status.as_u16(),
                location = %sanitize(&next),
                "following redirect"
            );
            url = next;
        }
    }

    fn transport_for(
        &self,
        prepared: &Prepared,
        config: &RequestConfig,
        url: &Url,
    ) -> std::result::Result<Arc<dyn Transport>, ExecutionError> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }

        let host = url.host_str().unwrap_or_default();
        let mut settings = prepared.settings.clone();
        settings.proxy = config.proxy_for(host).cloned();
        debug!(host, proxied = settings.proxy.is_some(), "selected transport");

        let transport = match self.clients.entry(settings) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let transport = Arc::new(ReqwestTransport::new(
                    entry.key().clone(),
                    &prepared.material,
                )?);
                entry.insert(Arc::clone(&transport));
                transport
            }
        };
        Ok(transport)
    }

    async fn load_cookie_files(&self, config: &RequestConfig) -> Result<()> {
        for path in &config.cookies().files {
            let contents = self.loader.read(path).await.map_err(|e| ExecutionError::Resource {
                what: format!("cookie file '{}'", path.display()),
                reason: e.to_string(),
            })?;
            let records = cookies::parse_netscape(&String::from_utf8_lossy(&contents));
            let loaded = cookies::load_into(&self.jar, &records);
            debug!(path = %path.display(), loaded, "loaded cookie file");
        }
        Ok(())
    }

    /// Flag-supplied cookies first, then matching jar cookies.
    fn with_jar_cookies(&self, headers: &HeaderMap, url: &Url) -> HeaderMap {
        let mut headers = headers.clone();
        let Some(stored) = self.jar.cookies(url) else {
            return headers;
        };
        let merged = match headers.get(COOKIE) {
            Some(existing) => {
                let mut joined = existing.as_bytes().to_vec();
                joined.extend_from_slice(b"; ");
                joined.extend_from_slice(stored.as_bytes());
                HeaderValue::from_bytes(&joined).unwrap_or(stored)
            }
            None => stored,
        };
        headers.insert(COOKIE, merged);
        headers
    }

    fn store_cookies(&self, headers: &HeaderMap, url: &Url, seen: &mut Vec<CookieRecord>) {
        let mut values = headers.get_all(SET_COOKIE).iter().peekable();
        if values.peek().is_none() {
            return;
        }
        seen.extend(
            headers
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter_map(|v| CookieRecord::from_set_cookie(v, url)),
        );
        self.jar.set_cookies(&mut values, url);
    }
}

/// Where to go next, if this response is a redirect we follow.
fn redirect_target(
    config: &RequestConfig,
    status: StatusCode,
    headers: &HeaderMap,
    current: &Url,
) -> std::result::Result<Option<Url>, ExecutionError> {
    if !config.redirect().follow || !is_followed_redirect(status) {
        return Ok(None);
    }
    let Some(location) = headers.get(LOCATION) else {
        return Ok(None);
    };
    let location = String::from_utf8_lossy(location.as_bytes());
    let next = current
        .join(location.trim())
        .map_err(|e| ExecutionError::InvalidUrl {
            url: sanitize_url(&location),
            reason: e.to_string(),
        })?;
    match next.scheme() {
        "http" | "https" => Ok(Some(next)),
        other => Err(ExecutionError::InvalidUrl {
            url: sanitize(&next),
            reason: format!("redirect to unsupported scheme '{other}'"),
        }),
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// 301, 302 and 303 continue as GET without a body; HEAD stays HEAD.
fn rewrites_to_get(status: StatusCode, method: &Method) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303) && *method != Method::HEAD
}

fn same_origin_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

fn with_url(err: ExecutionError, url: &Url) -> ExecutionError {
    match err {
        ExecutionError::Connection { kind, reason, .. } => ExecutionError::Connection {
            url: sanitize(url),
            kind,
            reason,
        },
        other => other,
    }
}

/// Collect the body, failing as soon as it grows past `cap`.
async fn read_capped(
    mut body: BodyStream,
    headers: &HeaderMap,
    cap: Option<u64>,
) -> std::result::Result<Bytes, ExecutionError> {
    if let Some(limit) = cap {
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(ExecutionError::ResponseTooLarge { limit });
        }
    }

    let mut out = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| ExecutionError::Connection {
            url: String::new(),
            kind: err.kind,
            reason: err.message,
        })?;
        out.extend_from_slice(&chunk);
        if let Some(limit) = cap {
            if out.len() as u64 > limit {
                warn!(limit, "response body over the size cap, aborting");
                return Err(ExecutionError::ResponseTooLarge { limit });
            }
        }
    }
    Ok(out.freeze())
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`Executor`].
#[derive(Default)]
pub struct ExecutorBuilder {
    transport: Option<Arc<dyn Transport>>,
    loader: Option<Arc<dyn ResourceLoader>>,
    jar: Option<Arc<Jar>>,
    limits: Option<Limits>,
    user_agent: Option<Option<String>>,
    max_response_bytes: Option<u64>,
}

impl ExecutorBuilder {
    /// Use `transport` for every request instead of the built-in reqwest
    /// client. Proxy, TLS and compression flags are then up to it.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn loader(mut self, loader: impl ResourceLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// `None` sends no User-Agent unless a request sets one.
    pub fn user_agent(mut self, agent: Option<String>) -> Self {
        self.user_agent = Some(agent);
        self
    }

    /// Cap for calls without `--max-filesize`.
    pub fn max_response_bytes(mut self, max: u64) -> Self {
        self.max_response_bytes = Some(max);
        self
    }

    pub fn build(self) -> Executor {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| Some(DEFAULT_USER_AGENT.to_string()));
        Executor {
            transport: self.transport,
            loader: self.loader.unwrap_or_else(|| Arc::new(FsLoader)),
            jar: self.jar.unwrap_or_default(),
            limits: self.limits.unwrap_or_default(),
            user_agent: user_agent.map(Arc::from),
            max_response_bytes: self.max_response_bytes,
            clients: Arc::new(DashMap::new()),
        }
    }
}
