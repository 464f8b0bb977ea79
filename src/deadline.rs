//! Deadline resolution and cooperative cancellation
//!
//! A caller passes a [`Cancellation`] (token plus optional deadline) to the
//! executor. [`resolve`] turns it and the configured `--max-time` into one
//! [`EffectiveDeadline`]:
//!
//! - a caller deadline always wins, even when the config timeout is shorter
//! - otherwise a positive config timeout starts counting now
//! - otherwise there is no deadline
//!
//! The effective deadline owns a child cancellation scope. Dropping it cancels
//! the scope, so everything spawned under it stops on every exit path while
//! the caller's own token is left untouched.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::error::CancellationError;

/// What the caller hands to the executor.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one shared with other tasks.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Which input produced the effective deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineSource {
    Caller,
    Config,
    None,
}

impl fmt::Display for DeadlineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeadlineSource::Caller => "caller",
            DeadlineSource::Config => "configured",
            DeadlineSource::None => "no",
        })
    }
}

/// The one deadline a request execution obeys.
#[derive(Debug)]
pub struct EffectiveDeadline {
    deadline: Option<Instant>,
    source: DeadlineSource,
    started: Instant,
    scope: CancellationToken,
    _release: DropGuard,
}

/// Combine the caller's cancellation with the configured timeout.
pub fn resolve(caller: &Cancellation, configured: Option<Duration>) -> EffectiveDeadline {
    let started = Instant::now();
    let (deadline, source) = match (caller.deadline(), configured) {
        (Some(deadline), _) => (Some(deadline), DeadlineSource::Caller),
        (None, Some(timeout)) if !timeout.is_zero() => {
            (Some(started + timeout), DeadlineSource::Config)
        }
        _ => (None, DeadlineSource::None),
    };

    let scope = caller.token().child_token();
    let release = scope.clone().drop_guard();
    debug!(
        source = %source,
        remaining_ms = deadline.map(|d| d.saturating_duration_since(started).as_millis() as u64),
        "resolved deadline"
    );

    EffectiveDeadline {
        deadline,
        source,
        started,
        scope,
        _release: release,
    }
}

impl EffectiveDeadline {
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn source(&self) -> DeadlineSource {
        self.source
    }

    /// Token cancelled when the caller cancels or this value is dropped.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fail fast when cancelled or past the deadline.
    pub fn check(&self) -> Result<(), CancellationError> {
        if self.scope.is_cancelled() {
            return Err(CancellationError::Cancelled);
        }
        if self.is_expired() {
            return Err(self.exceeded());
        }
        Ok(())
    }

    /// Run `fut` until it completes, the scope is cancelled, or the deadline
    /// passes. The future is dropped on cancellation, aborting in-flight I/O.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, CancellationError> {
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(CancellationError::Cancelled),
            _ = sleep_until(self.deadline) => Err(self.exceeded()),
            output = fut => Ok(output),
        }
    }

    /// Interruptible sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CancellationError> {
        self.guard(tokio::time::sleep(duration)).await
    }

    fn exceeded(&self) -> CancellationError {
        CancellationError::DeadlineExceeded {
            origin: self.source,
            elapsed: self.started.elapsed(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
