//! Immutable request configuration
//!
//! A [`RequestConfig`] is produced once by the converter (or assembled through
//! [`RequestConfigBuilder`]) and never changes afterwards. Share it behind an
//! `Arc`; derive a variant with [`RequestConfig::to_builder`], which clones
//! every sub-structure.

mod body;
mod policy;
mod proxy;
mod tls;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::redact::{is_sensitive_header, Secret, REDACTED};

pub use body::{
    DataKind, DataPart, FormField, FormKind, FormValue, RequestBody, StreamingBody, UploadSource,
    UploadStream,
};
pub use policy::{
    CookieOptions, HttpVersionPref, OutputOptions, RedirectPolicy, RetryPolicy, Timeouts,
    DEFAULT_MAX_REDIRECTS, DEFAULT_RETRYABLE_STATUS, DEFAULT_RETRY_DELAY, MAX_RETRY_DELAY,
};
pub use proxy::BypassList;
pub use tls::{Fingerprint, TlsOptions, TlsVersion};

// ============================================================================
// HEADERS
// ============================================================================

/// One `-H` argument.
///
/// `Name: value` sets a header, `Name:` suppresses a header the client would
/// add on its own, and `Name;` sends the header with an empty value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Header {
    name: String,
    value: Option<String>,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn suppress(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse a header argument. The error never contains the value.
    pub fn parse(line: &str) -> Result<Self, &'static str> {
        if let Some((name, value)) = line.split_once(':') {
            if name.is_empty() {
                return Err("empty header name");
            }
            let value = value.trim();
            if value.is_empty() {
                Ok(Self::suppress(name))
            } else {
                Ok(Self::new(name, value))
            }
        } else if let Some(name) = line.strip_suffix(';') {
            if name.is_empty() {
                return Err("empty header name");
            }
            Ok(Self::new(name, ""))
        } else {
            Err("expected 'Name: value'")
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` for a suppressed header.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// The `-H` argument that reproduces this header.
    pub fn to_arg(&self) -> String {
        match self.value.as_deref() {
            None => format!("{}:", self.name),
            Some("") => format!("{};", self.name),
            Some(value) => format!("{}: {}", self.name, value),
        }
    }

    /// Serialized `Name: value` length, as checked by validation.
    pub fn line_len(&self) -> usize {
        self.name.len() + 2 + self.value.as_deref().map_or(0, str::len)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match &self.value {
            Some(_) if is_sensitive_header(&self.name) => Some(REDACTED),
            other => other.as_deref(),
        };
        f.debug_struct("Header")
            .field("name", &self.name)
            .field("value", &value)
            .finish()
    }
}

// ============================================================================
// QUERY AND CREDENTIALS
// ============================================================================

/// One `--url-query` argument, encoded when the URL is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryParam {
    raw: String,
}

impl QueryParam {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// `+text` is appended verbatim; `name=value`, `=value` and `value` are
    /// percent-encoded the way `--data-urlencode` encodes them.
    pub fn encoded(&self) -> String {
        if let Some(verbatim) = self.raw.strip_prefix('+') {
            return verbatim.to_string();
        }
        match self.raw.split_once('=') {
            Some(("", value)) => encode_component(value.as_bytes()),
            Some((name, value)) => format!("{}={}", name, encode_component(value.as_bytes())),
            None => encode_component(self.raw.as_bytes()),
        }
    }
}

/// `application/x-www-form-urlencoded` encoding of one component.
pub fn encode_component(bytes: &[u8]) -> String {
    url::form_urlencoded::byte_serialize(bytes).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: String,
    pub password: Option<Secret>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub basic: Option<BasicAuth>,
    pub bearer: Option<Secret>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.basic.is_none() && self.bearer.is_none()
    }
}

// ============================================================================
// REQUEST CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    method: Option<String>,
    url: String,
    headers: Vec<Header>,
    body: Option<RequestBody>,
    form: Vec<FormField>,
    query: Vec<QueryParam>,
    credentials: Credentials,
    tls: TlsOptions,
    proxy: Option<Url>,
    no_proxy: Option<BypassList>,
    compressed: bool,
    redirect: RedirectPolicy,
    retry: RetryPolicy,
    cookies: CookieOptions,
    output: OutputOptions,
    timeouts: Timeouts,
    max_response_bytes: Option<u64>,
    http_version: HttpVersionPref,
    allow_plaintext_auth: bool,
    head: bool,
    get_mode: bool,
}

impl RequestConfig {
    pub fn builder() -> RequestConfigBuilder {
        RequestConfigBuilder::new()
    }

    /// An independent builder seeded with a deep copy of this config.
    pub fn to_builder(&self) -> RequestConfigBuilder {
        RequestConfigBuilder {
            inner: self.clone(),
        }
    }

    /// Effective method: `-X` wins, then `-I`, `-G`, a body or form (POST),
    /// `-T` (PUT), and GET otherwise.
    pub fn method(&self) -> &str {
        if let Some(method) = self.method.as_deref().filter(|m| !m.is_empty()) {
            return method;
        }
        if self.head {
            return "HEAD";
        }
        if self.get_mode {
            return "GET";
        }
        match &self.body {
            Some(RequestBody::Upload(_)) => "PUT",
            Some(_) => "POST",
            None if !self.form.is_empty() => "POST",
            None => "GET",
        }
    }

    /// Method given with `-X`, if any.
    pub fn explicit_method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The URL parsed, with `http://` assumed when no scheme is given.
    pub fn parsed_url(&self) -> Result<Url, url::ParseError> {
        if self.url.contains("://") {
            Url::parse(&self.url)
        } else {
            Url::parse(&format!("http://{}", self.url))
        }
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Last non-suppressed value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.is_named(name))
            .and_then(Header::value)
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn form(&self) -> &[FormField] {
        &self.form
    }

    pub fn query(&self) -> &[QueryParam] {
        &self.query
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    pub fn no_proxy(&self) -> Option<&BypassList> {
        self.no_proxy.as_ref()
    }

    /// Proxy to use for `host`, honoring the bypass list.
    pub fn proxy_for(&self, host: &str) -> Option<&Url> {
        let bypassed = self.no_proxy.as_ref().is_some_and(|list| list.matches(host));
        self.proxy.as_ref().filter(|_| !bypassed)
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn redirect(&self) -> &RedirectPolicy {
        &self.redirect
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cookies(&self) -> &CookieOptions {
        &self.cookies
    }

    pub fn output(&self) -> &OutputOptions {
        &self.output
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn max_response_bytes(&self) -> Option<u64> {
        self.max_response_bytes
    }

    pub fn http_version(&self) -> HttpVersionPref {
        self.http_version
    }

    pub fn allow_plaintext_auth(&self) -> bool {
        self.allow_plaintext_auth
    }

    pub fn is_head(&self) -> bool {
        self.head
    }

    /// `-G`: data parts go into the query string instead of the body.
    pub fn is_get_mode(&self) -> bool {
        self.get_mode
    }

    /// Whether any credential would be sent (flags or auth headers).
    pub fn carries_credentials(&self) -> bool {
        !self.credentials.is_empty()
            || self.headers.iter().any(|h| {
                h.value().is_some()
                    && (h.is_named("authorization") || h.is_named("proxy-authorization"))
            })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: None,
            url: String::new(),
            headers: Vec::new(),
            body: None,
            form: Vec::new(),
            query: Vec::new(),
            credentials: Credentials::default(),
            tls: TlsOptions::default(),
            proxy: None,
            no_proxy: None,
            compressed: false,
            redirect: RedirectPolicy::default(),
            retry: RetryPolicy::none(),
            cookies: CookieOptions::default(),
            output: OutputOptions::default(),
            timeouts: Timeouts::default(),
            max_response_bytes: None,
            http_version: HttpVersionPref::Auto,
            allow_plaintext_auth: false,
            head: false,
            get_mode: false,
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Fluent builder for [`RequestConfig`]. Building never fails; run
/// [`crate::validate::validate`] on the result.
#[derive(Debug, Clone, Default)]
pub struct RequestConfigBuilder {
    inner: RequestConfig,
}

impl RequestConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.inner.url = url.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.inner.method = Some(method.into());
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.inner.headers.push(header);
        self
    }

    /// Drop every header with this name.
    pub fn without_header(mut self, name: &str) -> Self {
        self.inner.headers.retain(|h| !h.is_named(name));
        self
    }

    /// Append a `-d`-family part.
    pub fn data(mut self, part: DataPart) -> Self {
        match &mut self.inner.body {
            Some(RequestBody::Data(parts)) => parts.push(part),
            body => *body = Some(RequestBody::Data(vec![part])),
        }
        self
    }

    pub fn upload(mut self, source: UploadSource) -> Self {
        self.inner.body = Some(RequestBody::Upload(source));
        self
    }

    pub fn body_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.inner.body = Some(RequestBody::Bytes(bytes.into()));
        self
    }

    pub fn body_stream(mut self, stream: StreamingBody) -> Self {
        self.inner.body = Some(RequestBody::Stream(stream));
        self
    }

    pub fn form(mut self, field: FormField) -> Self {
        self.inner.form.push(field);
        self
    }

    pub fn query(mut self, param: QueryParam) -> Self {
        self.inner.query.push(param);
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.inner.credentials.basic = Some(BasicAuth {
            user: user.into(),
            password: password.map(Secret::new),
        });
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.inner.credentials.bearer = Some(Secret::new(token.into()));
        self
    }

    /// Append inline cookies; repeated calls are joined with `; `.
    pub fn cookie(mut self, cookies: &str) -> Self {
        let inline = &mut self.inner.cookies.inline;
        *inline = Some(Secret::new(match inline.take() {
            Some(existing) => format!("{}; {cookies}", existing.expose()),
            None => cookies.to_string(),
        }));
        self
    }

    pub fn cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.cookies.files.push(path.into());
        self
    }

    pub fn cookie_jar(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.cookies.jar = Some(path.into());
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.inner.tls = tls;
        self
    }

    /// Edit TLS options in place.
    pub fn with_tls(mut self, f: impl FnOnce(&mut TlsOptions)) -> Self {
        f(&mut self.inner.tls);
        self
    }

    pub fn proxy(mut self, proxy: Url) -> Self {
        self.inner.proxy = Some(proxy);
        self
    }

    pub fn no_proxy(mut self, bypass: BypassList) -> Self {
        self.inner.no_proxy = Some(bypass);
        self
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.inner.compressed = compressed;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.inner.redirect.follow = follow;
        self
    }

    pub fn trusted_redirects(mut self, trusted: bool) -> Self {
        self.inner.redirect.trusted = trusted;
        self
    }

    pub fn max_redirects(mut self, max: i64) -> Self {
        self.inner.redirect.max_hops = max;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.inner.retry = policy;
        self
    }

    /// `--retry N`; keeps delay and window settings made earlier.
    ///
    /// `N > 0` enables the default retryable set unless one is already set.
    /// `--retry 0` leaves no default set behind, matching a command without
    /// `--retry`.
    pub fn retries(mut self, retries: u32) -> Self {
        let retry = &mut self.inner.retry;
        retry.max_attempts = retries.saturating_add(1);
        let is_default = retry
            .retryable_status
            .iter()
            .copied()
            .eq(DEFAULT_RETRYABLE_STATUS.into_iter());
        if retries == 0 && is_default {
            retry.retryable_status.clear();
        } else if retries > 0 && retry.retryable_status.is_empty() {
            retry.retryable_status = DEFAULT_RETRYABLE_STATUS.into_iter().collect();
        }
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.inner.retry.base_delay = delay;
        self
    }

    pub fn retry_max_time(mut self, window: Duration) -> Self {
        self.inner.retry.max_time = Some(window);
        self
    }

    pub fn retry_all_errors(mut self, all: bool) -> Self {
        self.inner.retry.retry_all_errors = all;
        self
    }

    pub fn retryable_status(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.inner.retry.retryable_status = statuses.into_iter().collect();
        self
    }

    pub fn timeout(mut self, secs: f64) -> Self {
        self.inner.timeouts.total = Some(secs);
        self
    }

    pub fn connect_timeout(mut self, secs: f64) -> Self {
        self.inner.timeouts.connect = Some(secs);
        self
    }

    pub fn max_response_bytes(mut self, max: u64) -> Self {
        self.inner.max_response_bytes = Some(max);
        self
    }

    pub fn http_version(mut self, pref: HttpVersionPref) -> Self {
        self.inner.http_version = pref;
        self
    }

    pub fn allow_plaintext_auth(mut self, allow: bool) -> Self {
        self.inner.allow_plaintext_auth = allow;
        self
    }

    pub fn head(mut self, head: bool) -> Self {
        self.inner.head = head;
        self
    }

    pub fn get_mode(mut self, get: bool) -> Self {
        self.inner.get_mode = get;
        self
    }

    pub fn output(mut self, output: OutputOptions) -> Self {
        self.inner.output = output;
        self
    }

    /// Edit output options in place.
    pub fn with_output(mut self, f: impl FnOnce(&mut OutputOptions)) -> Self {
        f(&mut self.inner.output);
        self
    }

    pub fn build(self) -> RequestConfig {
        self.inner
    }
}
