//! Tool-level defaults from a TOML settings file
//!
//! The file lives at `$KURL_CONFIG` or `<config_dir>/kurl/config.toml`
//! (`~/.config/kurl/config.toml` on Linux).
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Command-line flags
//! 2. Settings file
//! 3. Built-in defaults
//!
//! ```toml
//! user_agent = "kurl-ci/1.0"
//! max_body_bytes = 1048576
//! max_response_bytes = 52428800
//! retryable_status = [429, 503]
//! connect_timeout_secs = 5.0
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RequestConfig, DEFAULT_RETRYABLE_STATUS};
use crate::engine::ExecutorBuilder;
use crate::error::{KurlError, Result};
use crate::limits::Limits;

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "KURL_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// User-Agent sent when the command has no `-A`; empty disables it
    pub user_agent: Option<String>,

    /// Request body cap in bytes
    pub max_body_bytes: Option<usize>,

    /// Response body cap in bytes when the command has no `--max-filesize`
    pub max_response_bytes: Option<u64>,

    /// Statuses retried by `--retry` instead of the built-in set
    pub retryable_status: Option<Vec<u16>>,

    /// Connect timeout when the command has no `--connect-timeout`
    pub connect_timeout_secs: Option<f64>,
}

impl Settings {
    /// `$KURL_CONFIG`, else `<config_dir>/kurl/config.toml`.
    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kurl")
            .join("config.toml")
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| KurlError::Settings {
            path: path.display().to_string(),
            reason: format!("failed to read: {e}"),
        })?;

        let settings = Self::from_toml(&content).map_err(|reason| KurlError::Settings {
            path: path.display().to_string(),
            reason,
        })?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, String> {
        let settings: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        if let Some(secs) = settings.connect_timeout_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(format!("connect_timeout_secs must be >= 0, got {secs}"));
            }
        }
        if let Some(statuses) = &settings.retryable_status {
            if let Some(bad) = statuses.iter().find(|s| !(100..=599).contains(*s)) {
                return Err(format!("retryable_status contains invalid status {bad}"));
            }
        }
        Ok(settings)
    }

    /// Validation caps with the file's body cap applied.
    pub fn limits(&self) -> Limits {
        match self.max_body_bytes {
            Some(max) => Limits::default().with_max_body_bytes(max),
            None => Limits::default(),
        }
    }

    /// Executor builder seeded with the file's defaults.
    pub fn executor(&self) -> ExecutorBuilder {
        let mut builder = ExecutorBuilder::default().limits(self.limits());
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(Some(agent.clone()).filter(|a| !a.is_empty()));
        }
        if let Some(max) = self.max_response_bytes {
            builder = builder.max_response_bytes(max);
        }
        builder
    }

    /// Fill in per-request values the command left unset.
    pub fn apply(&self, config: &RequestConfig) -> RequestConfig {
        let mut builder = config.to_builder();
        if config.timeouts().connect.is_none() {
            if let Some(secs) = self.connect_timeout_secs {
                builder = builder.connect_timeout(secs);
            }
        }
        if let Some(statuses) = &self.retryable_status {
            let default: BTreeSet<u16> = DEFAULT_RETRYABLE_STATUS.into_iter().collect();
            if config.retry().retries() > 0 && config.retry().retryable_status == default {
                builder = builder.retryable_status(statuses.iter().copied());
            }
        }
        builder.build()
    }
}
