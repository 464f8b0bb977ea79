//! Entry points from text or arguments to a validated [`RequestConfig`]
//!
//! Both paths end in the same converter and validator:
//!
//! - raw command: `tokenize` → `expand` → `convert` → `validate`
//! - pre-split arguments: `classify` → `convert` → `validate`
//!
//! Pre-split arguments are taken literally; whatever shell produced them has
//! already done its own expansion.

use tracing::{debug, instrument};

use crate::config::RequestConfig;
use crate::convert::convert;
use crate::error::Result;
use crate::expand::{expand, EnvironmentLookup};
use crate::limits::Limits;
use crate::token::classify;
use crate::tokenizer::tokenize;
use crate::validate::validate_with;

/// Parses commands against a fixed set of [`Limits`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandParser {
    limits: Limits,
}

impl CommandParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Parse a shell-syntax command, expanding variables through `env`.
    #[instrument(skip_all, fields(len = raw.len()))]
    pub fn parse_command(&self, raw: &str, env: &dyn EnvironmentLookup) -> Result<RequestConfig> {
        let tokens = tokenize(raw)?;
        let tokens = expand(&tokens, env);
        debug!(tokens = tokens.len(), "tokenized command");
        let config = convert(&tokens)?;
        validate_with(&config, &self.limits)?;
        Ok(config)
    }

    /// Parse a pre-split argument list. A leading `curl` is skipped.
    #[instrument(skip_all)]
    pub fn parse_args<I, S>(&self, args: I) -> Result<RequestConfig>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = classify(args);
        debug!(tokens = tokens.len(), "classified arguments");
        let config = convert(&tokens)?;
        validate_with(&config, &self.limits)?;
        Ok(config)
    }
}

/// [`CommandParser::parse_command`] with default limits.
pub fn parse_command(raw: &str, env: &dyn EnvironmentLookup) -> Result<RequestConfig> {
    CommandParser::new().parse_command(raw, env)
}

/// [`CommandParser::parse_args`] with default limits.
pub fn parse_args<I, S>(args: I) -> Result<RequestConfig>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    CommandParser::new().parse_args(args)
}
