//! kurl - HTTP requests written in curl command syntax
//!
//! Text flows leaf-to-root through the pipeline:
//!
//! ```text
//! raw command ─► tokenizer ─► expand ─► convert ─► validate ─► engine ─► Response
//!                                                              │
//!                                               deadline + retry controller
//! ```
//!
//! A pre-split argument list enters at [`token::classify`] and joins the same
//! converter, so both entry paths behave identically.
//!
//! ```rust
//! use std::collections::HashMap;
//! use kurl::{parse_command, TokenKind};
//!
//! let mut vars = HashMap::new();
//! vars.insert("TOKEN".to_string(), "abc".to_string());
//!
//! let config = parse_command("curl -H 'X-Token: $TOKEN' https://example.com", &vars).unwrap();
//! assert_eq!(config.url(), "https://example.com");
//! assert_eq!(config.headers()[0].value(), Some("$TOKEN"));
//!
//! let tokens = kurl::tokenize("-H \"X-Token: $TOKEN\" https://example.com").unwrap();
//! assert_eq!(tokens[0].kind(), TokenKind::Flag);
//! ```

pub mod canonical;
pub mod config;
pub mod convert;
pub mod cookies;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod expand;
pub mod flags;
pub mod limits;
pub mod loader;
pub mod pipeline;
mod prepare;
pub mod redact;
pub mod response;
pub mod retry;
pub mod settings;
pub mod token;
pub mod tokenizer;
pub mod transport;
pub mod validate;

pub use config::{RequestConfig, RequestConfigBuilder};
pub use convert::convert;
pub use cookies::CookieRecord;
pub use deadline::{resolve, Cancellation, DeadlineSource, EffectiveDeadline};
pub use engine::{Executor, ExecutorBuilder, DEFAULT_USER_AGENT};
pub use error::{
    CancellationError, ConversionError, ExecutionError, FixSuggestion, KurlError, Result,
    TokenizeError, ValidationError,
};
pub use expand::{expand, EnvironmentLookup, ProcessEnv, VarMap};
pub use limits::Limits;
pub use loader::{FsLoader, MemoryLoader, ResourceLoader};
pub use pipeline::{parse_args, parse_command, CommandParser};
pub use response::Response;
pub use retry::{AttemptResult, RetryController, RetryDecision, RetryReason, RetryState};
pub use settings::Settings;
pub use token::{classify, Token, TokenKind};
pub use tokenizer::tokenize;
pub use transport::{
    CircuitBreakerTransport, OutboundRequest, RateLimitedTransport, ReqwestTransport, Transport,
    TransportError, TransportErrorKind, TransportResponse,
};
pub use validate::{validate, validate_with};
