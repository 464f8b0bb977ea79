//! Retry controller
//!
//! One controller drives the attempts for one request hop:
//!
//! ```text
//! Attempting ──► Success
//!     │
//!     ├────────► Failed      (budget spent, window elapsed, deadline, cancel)
//!     │
//!     └─► Retrying ──(backoff)──► Attempting
//! ```
//!
//! Transport errors and statuses in the policy's retryable set are retried
//! while budget remains. Every other response, including 4xx/5xx outside the
//! set, is a success at this layer. Backoff sleeps and the attempts themselves
//! run under the effective deadline, so cancellation always wins.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::deadline::EffectiveDeadline;
use crate::error::{ExecutionError, KurlError};
use crate::transport::{TransportError, TransportErrorKind, TransportResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    Retrying,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Success,
    TransportError(TransportErrorKind),
    RetryableStatus(u16),
    BudgetExhausted,
    RetryWindowElapsed,
    /// The body is a one-shot stream
    NotReplayable,
}

/// Computed fresh for every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    pub reason: RetryReason,
}

impl RetryDecision {
    fn stop(reason: RetryReason) -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            reason,
        }
    }
}

pub type AttemptResult = Result<TransportResponse, TransportError>;

#[derive(Debug)]
pub struct RetryController {
    policy: RetryPolicy,
    replayable: bool,
    url: String,
    state: RetryState,
    attempts: u32,
}

impl RetryController {
    /// `url` is used in errors and must already be sanitized.
    pub fn new(policy: RetryPolicy, replayable: bool, url: impl Into<String>) -> Self {
        if !replayable && policy.max_attempts > 1 {
            warn!(
                retries = policy.retries(),
                "request body is a one-shot stream; retries disabled"
            );
        }
        Self {
            policy,
            replayable,
            url: url.into(),
            state: RetryState::Attempting,
            attempts: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        if self.replayable {
            self.policy.max_attempts.max(1)
        } else {
            1
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Classify attempt number `attempt` (1-based). `elapsed` is measured from
    /// the first attempt and feeds the `--retry-max-time` window.
    pub fn decide(&self, attempt: u32, outcome: &AttemptResult, elapsed: Duration) -> RetryDecision {
        let (reason, retry_after) = match outcome {
            Err(err) => (RetryReason::TransportError(err.kind), None),
            Ok(response) => {
                let status = response.status.as_u16();
                // a one-shot body behaves as if no retry was configured
                if !self.replayable || !self.policy.is_retryable_status(status) {
                    return RetryDecision::stop(RetryReason::Success);
                }
                (RetryReason::RetryableStatus(status), retry_after(response))
            }
        };

        if !self.replayable && self.policy.max_attempts > 1 {
            return RetryDecision::stop(RetryReason::NotReplayable);
        }
        if attempt >= self.max_attempts() {
            return RetryDecision::stop(RetryReason::BudgetExhausted);
        }

        let backoff = self.policy.backoff(attempt);
        let delay = retry_after
            .map_or(backoff, |hint| hint.max(backoff))
            .min(self.policy.max_delay);
        if let Some(window) = self.policy.max_time {
            if elapsed + delay > window {
                return RetryDecision::stop(RetryReason::RetryWindowElapsed);
            }
        }
        RetryDecision {
            should_retry: true,
            delay,
            reason,
        }
    }

    /// Run attempts until success or failure. `attempt` receives the 1-based
    /// attempt number and must build a fresh request each time.
    pub async fn run<F, Fut>(
        &mut self,
        deadline: &EffectiveDeadline,
        mut attempt: F,
    ) -> Result<TransportResponse, KurlError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptResult>,
    {
        let started = Instant::now();
        loop {
            if let Err(err) = deadline.check() {
                self.state = RetryState::Failed;
                return Err(err.into());
            }

            self.attempts += 1;
            let number = self.attempts;
            debug!(attempt = number, max = self.max_attempts(), url = %self.url, "sending attempt");

            let outcome = match deadline.guard(attempt(number)).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.state = RetryState::Failed;
                    return Err(err.into());
                }
            };

            let decision = self.decide(number, &outcome, started.elapsed());
            if !decision.should_retry {
                return self.finish(outcome, decision);
            }

            self.state = RetryState::Retrying;
            debug!(
                attempt = number,
                delay_ms = decision.delay.as_millis() as u64,
                reason = ?decision.reason,
                "retrying"
            );
            // Release the connection before sleeping.
            drop(outcome);
            if let Err(err) = deadline.sleep(decision.delay).await {
                self.state = RetryState::Failed;
                return Err(err.into());
            }
            self.state = RetryState::Attempting;
        }
    }

    fn finish(
        &mut self,
        outcome: AttemptResult,
        decision: RetryDecision,
    ) -> Result<TransportResponse, KurlError> {
        let error = match outcome {
            Ok(response) if decision.reason == RetryReason::Success => {
                self.state = RetryState::Success;
                return Ok(response);
            }
            Ok(response) => ExecutionError::RetryableStatus {
                status: response.status.as_u16(),
                url: self.url.clone(),
            },
            Err(err) => ExecutionError::Connection {
                url: self.url.clone(),
                kind: err.kind,
                reason: err.message,
            },
        };
        self.state = RetryState::Failed;
        debug!(attempts = self.attempts, reason = ?decision.reason, "giving up");

        if self.attempts > 1 {
            Err(ExecutionError::RetriesExhausted {
                attempts: self.attempts,
                last: Box::new(error),
            }
            .into())
        } else {
            Err(error.into())
        }
    }
}

/// `Retry-After` in delta-seconds. HTTP dates are ignored.
fn retry_after(response: &TransportResponse) -> Option<Duration> {
    response
        .headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
