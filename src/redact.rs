//! Secret masking for logs, errors and canonical output

use std::fmt;

use reqwest::header::HeaderMap;
use url::Url;

pub const REDACTED: &str = "[redacted]";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "x-auth-token",
    "x-csrf-token",
];

const SENSITIVE_FRAGMENTS: &[&str] = &["token", "secret", "password", "apikey", "api-key", "session"];

const SENSITIVE_QUERY_KEYS: &[&str] = &[
    "access_token",
    "api_key",
    "apikey",
    "auth",
    "key",
    "password",
    "secret",
    "sig",
    "signature",
    "token",
];

/// A string that never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&name.as_str())
        || SENSITIVE_FRAGMENTS.iter().any(|f| name.contains(f))
}

fn is_sensitive_query_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_QUERY_KEYS.contains(&key.as_str())
        || SENSITIVE_FRAGMENTS.iter().any(|f| key.contains(f))
}

/// Header pairs with sensitive values masked.
pub fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if is_sensitive_header(name.as_str()) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}

/// A URL safe to log: the password and sensitive query values are masked.
pub fn sanitize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => sanitize(&url),
        Err(_) => match raw.split_once(['?', '@']) {
            Some(_) => REDACTED.to_string(),
            None => raw.to_string(),
        },
    }
}

pub fn sanitize(url: &Url) -> String {
    let mut clean = url.clone();
    if clean.password().is_some() {
        let _ = clean.set_password(Some(REDACTED));
    }
    if clean.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let v = if is_sensitive_query_key(&k) {
                    REDACTED.to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), v)
            })
            .collect();
        clean.query_pairs_mut().clear().extend_pairs(pairs);
    }
    clean.to_string()
}
