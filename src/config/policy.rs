//! Retry, redirect, timeout and output policies

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::redact::Secret;

/// Statuses retried by `--retry` unless configured otherwise.
pub const DEFAULT_RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Default `--retry-delay` base.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for one backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(600);

pub const DEFAULT_MAX_REDIRECTS: i64 = 50;

/// How often and when to retry a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_status: BTreeSet<u16>,
    /// Retry every status >= 400 (`--retry-all-errors`)
    pub retry_all_errors: bool,
    /// Stop retrying once this much time has passed since the first attempt
    pub max_time: Option<Duration>,
}

impl RetryPolicy {
    /// A single attempt; no status is retryable.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
            retryable_status: BTreeSet::new(),
            retry_all_errors: false,
            max_time: None,
        }
    }

    /// `--retry <retries>`: the first attempt plus `retries` more.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            retryable_status: DEFAULT_RETRYABLE_STATUS.into_iter().collect(),
            ..Self::none()
        }
    }

    pub fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        if self.max_attempts <= 1 {
            return false;
        }
        self.retryable_status.contains(&status) || (self.retry_all_errors && status >= 400)
    }

    /// Backoff before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub follow: bool,
    /// Negative values are rejected by validation
    pub max_hops: i64,
    /// Keep credentials when the host changes (`--location-trusted`)
    pub trusted: bool,
}

impl RedirectPolicy {
    pub fn max_hops(&self) -> u32 {
        u32::try_from(self.max_hops.max(0)).unwrap_or(u32::MAX)
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            follow: false,
            max_hops: DEFAULT_MAX_REDIRECTS,
            trusted: false,
        }
    }
}

/// Timeouts in seconds as given; validation rejects negative values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timeouts {
    pub total: Option<f64>,
    pub connect: Option<f64>,
}

impl Timeouts {
    /// Whole-request timeout; zero means none.
    pub fn total(&self) -> Option<Duration> {
        self.total.and_then(positive_duration)
    }

    pub fn connect(&self) -> Option<Duration> {
        self.connect.and_then(positive_duration)
    }
}

fn positive_duration(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub path: Option<PathBuf>,
    pub include_headers: bool,
    pub fail_on_error: bool,
    pub silent: bool,
    pub show_error: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HttpVersionPref {
    #[default]
    Auto,
    Http1Only,
    Http2,
    Http2PriorKnowledge,
}

/// Cookies to send and where to keep received ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// `-b 'a=1; b=2'`, joined when given more than once
    pub inline: Option<Secret>,
    /// `-b cookies.txt`
    pub files: Vec<PathBuf>,
    /// `-c jar.txt`
    pub jar: Option<PathBuf>,
}
