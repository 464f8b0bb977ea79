//! Error types with fix suggestions
//!
//! Every layer owns its error enum; [`KurlError`] wraps them for the public API.
//! Codes are grouped by layer:
//!
//! | Range         | Layer                 |
//! |---------------|-----------------------|
//! | KURL-001..009 | tokenizer             |
//! | KURL-010..019 | option converter      |
//! | KURL-020..029 | validator             |
//! | KURL-030..049 | execution engine      |
//! | KURL-050..059 | deadline/cancellation |
//! | KURL-060..069 | settings and io       |
//!
//! Messages never echo header values, credentials or data payloads. Positions
//! and flag names are enough to locate the mistake.

use std::time::Duration;

use thiserror::Error;

use crate::deadline::DeadlineSource;
use crate::transport::TransportErrorKind;

pub type Result<T> = std::result::Result<T, KurlError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

// ─────────────────────────────────────────────────────────────
// Tokenizer (KURL-001 to KURL-009)
// ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("KURL-001: Unterminated {quote} quote opened at byte {position}")]
    UnterminatedQuote { quote: char, position: usize },

    #[error("KURL-002: Dangling escape at byte {position} (backslash at end of input)")]
    DanglingEscape { position: usize },
}

impl TokenizeError {
    pub fn position(&self) -> usize {
        match self {
            TokenizeError::UnterminatedQuote { position, .. } => *position,
            TokenizeError::DanglingEscape { position } => *position,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Option converter (KURL-010 to KURL-019)
// ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("KURL-010: Unknown flag '{flag}' at byte {position}")]
    UnknownFlag { flag: String, position: usize },

    #[error("KURL-011: Flag '{flag}' requires a value")]
    MissingValue { flag: String },

    #[error("KURL-012: Malformed header at byte {position}: {reason}")]
    MalformedHeader {
        position: usize,
        reason: &'static str,
    },

    #[error("KURL-013: More than one URL given (extra URL at byte {position})")]
    DuplicateUrl { position: usize },

    #[error("KURL-014: No URL given")]
    MissingUrl,

    #[error("KURL-015: Invalid value for '{flag}': {reason}")]
    InvalidValue { flag: String, reason: String },

    #[error("KURL-016: '{first}' cannot be combined with '{second}'")]
    ConflictingOptions { first: String, second: String },
}

// ─────────────────────────────────────────────────────────────
// Validator (KURL-020 to KURL-029)
// ─────────────────────────────────────────────────────────────

/// The configuration violated a hard constraint; the config itself is untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("KURL-020: Invalid {field}: {constraint}")]
pub struct ValidationError {
    pub field: String,
    pub constraint: Constraint,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            field: field.into(),
            constraint,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    #[error("must not be empty")]
    Empty,

    #[error("{actual} bytes exceeds the {max}-byte limit")]
    TooLong { max: usize, actual: usize },

    #[error("{actual} entries exceeds the limit of {max}")]
    TooMany { max: usize, actual: usize },

    #[error("'{0}' is not a standard HTTP method")]
    UnsupportedMethod(String),

    #[error("scheme '{0}' is not supported (use http or https)")]
    UnsupportedScheme(String),

    #[error("is managed by the client and cannot be set")]
    Forbidden,

    #[error("contains characters outside the RFC 7230 token set")]
    InvalidName,

    #[error("contains a line break")]
    LineBreak,

    #[error("credentials over plain http are refused (pass --allow-plaintext-auth to override)")]
    PlaintextCredentials,

    #[error("must not be negative")]
    Negative,

    #[error("{0}")]
    Malformed(String),
}

// ─────────────────────────────────────────────────────────────
// Execution engine (KURL-030 to KURL-049)
// ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("KURL-030: TLS configuration error: {reason}")]
    TlsConfig { reason: String },

    #[error("KURL-031: Proxy configuration error: {reason}")]
    ProxyConfig { reason: String },

    #[error("KURL-032: Request to {url} failed ({kind}): {reason}")]
    Connection {
        url: String,
        kind: TransportErrorKind,
        reason: String,
    },

    #[error("KURL-033: Response body exceeds the {limit}-byte limit")]
    ResponseTooLarge { limit: u64 },

    #[error("KURL-034: Maximum of {max} redirects exceeded (last location: {url})")]
    RedirectLoopExceeded { max: u32, url: String },

    #[error("KURL-035: Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ExecutionError>,
    },

    #[error("KURL-036: {url} answered with retryable status {status}")]
    RetryableStatus { status: u16, url: String },

    #[error("KURL-037: Cannot read {what}: {reason}")]
    Resource { what: String, reason: String },

    #[error("KURL-038: Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ExecutionError {
    /// The innermost cause, looking through retry exhaustion.
    pub fn root(&self) -> &ExecutionError {
        match self {
            ExecutionError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Deadline and cancellation (KURL-050 to KURL-059)
// ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CancellationError {
    #[error("KURL-050: Deadline exceeded after {}ms ({origin} deadline)", .elapsed.as_millis())]
    DeadlineExceeded {
        origin: DeadlineSource,
        elapsed: Duration,
    },

    #[error("KURL-051: Request cancelled")]
    Cancelled,
}

// ─────────────────────────────────────────────────────────────
// Top level
// ─────────────────────────────────────────────────────────────

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum KurlError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Cancellation(#[from] CancellationError),

    #[error("KURL-060: Settings error in {path}: {reason}")]
    Settings { path: String, reason: String },

    #[error("KURL-061: IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KurlError {
    /// Process exit status for the binary, following curl's numbering where one exists.
    pub fn exit_code(&self) -> i32 {
        match self {
            KurlError::Tokenize(_) | KurlError::Conversion(_) => 2,
            KurlError::Validation(err) if err.field == "url" => 3,
            KurlError::Validation(_) => 2,
            KurlError::Execution(err) => match err.root() {
                ExecutionError::TlsConfig { .. } => 35,
                ExecutionError::ProxyConfig { .. } => 5,
                ExecutionError::Connection { kind, .. } => match kind {
                    TransportErrorKind::Timeout => 28,
                    TransportErrorKind::Tls => 35,
                    TransportErrorKind::Proxy => 5,
                    TransportErrorKind::Body => 56,
                    _ => 7,
                },
                ExecutionError::ResponseTooLarge { .. } => 63,
                ExecutionError::RedirectLoopExceeded { .. } => 47,
                ExecutionError::RetryableStatus { .. } => 22,
                ExecutionError::Resource { .. } => 26,
                ExecutionError::InvalidUrl { .. } => 3,
                ExecutionError::RetriesExhausted { .. } => 7,
            },
            KurlError::Cancellation(CancellationError::DeadlineExceeded { .. }) => 28,
            KurlError::Cancellation(CancellationError::Cancelled) => 130,
            KurlError::Settings { .. } => 2,
            KurlError::Io(_) => 23,
        }
    }

    /// Whether running the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            KurlError::Execution(err) => matches!(
                err.root(),
                ExecutionError::Connection { .. } | ExecutionError::RetryableStatus { .. }
            ),
            _ => false,
        }
    }

    /// Whether the failure happened before any network traffic.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            KurlError::Tokenize(_) | KurlError::Conversion(_) | KurlError::Validation(_)
        )
    }
}

impl FixSuggestion for TokenizeError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TokenizeError::UnterminatedQuote { .. } => Some("Close the quote or escape it with a backslash"),
            TokenizeError::DanglingEscape { .. } => {
                Some("Remove the trailing backslash or put the next argument on the following line")
            }
        }
    }
}

impl FixSuggestion for ConversionError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ConversionError::UnknownFlag { .. } => Some("Remove the flag; kurl accepts a subset of curl options"),
            ConversionError::MissingValue { .. } => Some("Pass the flag's value as the next argument"),
            ConversionError::MalformedHeader { .. } => Some("Use the form -H 'Name: value'"),
            ConversionError::DuplicateUrl { .. } => Some("Quote arguments containing spaces; only one URL is allowed"),
            ConversionError::MissingUrl => Some("Add the target URL, e.g. https://example.com"),
            ConversionError::InvalidValue { .. } => Some("Check the value's format against curl's documentation"),
            ConversionError::ConflictingOptions { .. } => Some("Send either a data body, a form, or an upload file"),
        }
    }
}

impl FixSuggestion for ValidationError {
    fn fix_suggestion(&self) -> Option<&str> {
        match &self.constraint {
            Constraint::PlaintextCredentials => Some("Switch the URL to https"),
            Constraint::UnsupportedMethod(_) => {
                Some("Use GET, HEAD, POST, PUT, DELETE, CONNECT, OPTIONS, TRACE or PATCH")
            }
            Constraint::UnsupportedScheme(_) => Some("Only http:// and https:// URLs are executed"),
            Constraint::Forbidden => Some("Remove the header; it is derived from the request"),
            Constraint::TooLong { .. } | Constraint::TooMany { .. } => {
                Some("Shrink the request or raise the limit in the settings file")
            }
            _ => None,
        }
    }
}

impl FixSuggestion for ExecutionError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ExecutionError::TlsConfig { .. } => Some("Check --cert/--key/--cacert files are PEM encoded"),
            ExecutionError::ProxyConfig { .. } => Some("Use a proxy URL like http://host:port or socks5://host:port"),
            ExecutionError::Connection { .. } => Some("Check the host is reachable, or add --retry N"),
            ExecutionError::ResponseTooLarge { .. } => Some("Raise --max-filesize"),
            ExecutionError::RedirectLoopExceeded { .. } => Some("Raise --max-redirs or drop -L"),
            ExecutionError::RetriesExhausted { .. } => Some("Raise --retry or --retry-max-time"),
            ExecutionError::RetryableStatus { .. } => Some("The server is overloaded or failing; retry later"),
            ExecutionError::Resource { .. } => Some("Check file path and permissions"),
            ExecutionError::InvalidUrl { .. } => Some("Check the URL spelling"),
        }
    }
}

impl FixSuggestion for KurlError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            KurlError::Tokenize(e) => e.fix_suggestion(),
            KurlError::Conversion(e) => e.fix_suggestion(),
            KurlError::Validation(e) => e.fix_suggestion(),
            KurlError::Execution(e) => e.fix_suggestion(),
            KurlError::Cancellation(CancellationError::DeadlineExceeded { .. }) => {
                Some("Raise --max-time or the caller deadline")
            }
            KurlError::Cancellation(CancellationError::Cancelled) => None,
            KurlError::Settings { .. } => Some("Fix the TOML syntax or delete the settings file"),
            KurlError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_layered() {
        let err = KurlError::from(TokenizeError::DanglingEscape { position: 4 });
        assert!(err.to_string().starts_with("KURL-002"));
        assert!(err.is_input_error());
        assert!(!err.is_retryable());

        let err = KurlError::from(CancellationError::Cancelled);
        assert!(err.to_string().starts_with("KURL-051"));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_exhausted_exit_code_follows_root_cause() {
        let err = KurlError::from(ExecutionError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ExecutionError::Connection {
                url: "https://example.com/".into(),
                kind: TransportErrorKind::Timeout,
                reason: "timed out".into(),
            }),
        });
        assert_eq!(err.exit_code(), 28);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_every_input_error_has_suggestion() {
        let errors = [
            KurlError::from(ConversionError::MissingUrl),
            KurlError::from(ConversionError::MissingValue { flag: "-H".into() }),
            KurlError::from(TokenizeError::UnterminatedQuote {
                quote: '\'',
                position: 0,
            }),
        ];
        for err in errors {
            assert!(err.fix_suggestion().is_some(), "{err}");
        }
    }
}
