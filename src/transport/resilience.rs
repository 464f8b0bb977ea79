//! Operational wrappers around any [`Transport`]
//!
//! - [`RateLimitedTransport`] spaces requests with a token bucket
//! - [`CircuitBreakerTransport`] stops calling a failing upstream for a while
//!
//! Both sit below the retry controller, so a rejected call is an ordinary
//! transport error and is retried (or not) like any other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{OutboundRequest, Transport, TransportError, TransportErrorKind, TransportResponse};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────
// Rate limiting
// ─────────────────────────────────────────────────────────────

/// Token bucket refilled to capacity once per period.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    tokens: AtomicUsize,
    refill_period: Duration,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: usize, refill_period: Duration) -> Self {
        Self {
            capacity,
            tokens: AtomicUsize::new(capacity),
            refill_period,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.refill();
        let mut current = self.tokens.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Wait for a token. Gives up once `max_wait` has passed.
    pub async fn acquire(&self, max_wait: Duration) -> bool {
        let give_up = Instant::now() + max_wait;
        loop {
            if self.try_acquire() {
                return true;
            }
            let next = *lock(&self.last_refill) + self.refill_period;
            if next > give_up {
                return false;
            }
            tokio::time::sleep_until(next).await;
        }
    }

    pub fn available_tokens(&self) -> usize {
        self.refill();
        self.tokens.load(Ordering::Relaxed)
    }

    fn refill(&self) {
        let mut last_refill = lock(&self.last_refill);
        let now = Instant::now();
        if now.duration_since(*last_refill) >= self.refill_period {
            self.tokens.store(self.capacity, Ordering::SeqCst);
            *last_refill = now;
        }
    }
}

/// Waits for a [`RateLimiter`] token before each request.
#[derive(Debug)]
pub struct RateLimitedTransport<T> {
    inner: T,
    limiter: Arc<RateLimiter>,
    max_wait: Duration,
}

impl<T: Transport> RateLimitedTransport<T> {
    pub fn new(inner: T, limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner,
            limiter,
            max_wait: Duration::from_secs(60),
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

#[async_trait]
impl<T: Transport> Transport for RateLimitedTransport<T> {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        if !self.limiter.acquire(self.max_wait).await {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                "rate limit: no request slot within the wait budget",
            ));
        }
        self.inner.send(request).await
    }
}

// ─────────────────────────────────────────────────────────────
// Circuit breaking
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    /// Rejecting calls until the reset timeout passes
    Open,
    /// One probe allowed through
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    failures: usize,
    opened_at: Option<Instant>,
    state: BreakerState,
}

/// Opens after `failure_threshold` consecutive failures.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: usize,
    reset_timeout: Duration,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Arc::new(Mutex::new(BreakerInner {
                failures: 0,
                opened_at: None,
                state: BreakerState::Closed,
            })),
        }
    }

    pub fn can_proceed(&self) -> bool {
        let mut inner = lock(&self.inner);
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                }
                cooled
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = lock(&self.inner);
        inner.failures = 0;
        inner.opened_at = None;
        inner.state = BreakerState::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = lock(&self.inner);
        inner.failures += 1;
        let trip = match inner.state {
            BreakerState::Closed => inner.failures >= self.failure_threshold,
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        };
        if trip {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn current_state(&self) -> BreakerState {
        lock(&self.inner).state
    }
}

/// Fails fast while the breaker is open. Transport errors and 5xx responses
/// count as failures.
#[derive(Debug)]
pub struct CircuitBreakerTransport<T> {
    inner: T,
    breaker: CircuitBreaker,
}

impl<T: Transport> CircuitBreakerTransport<T> {
    pub fn new(inner: T, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<T: Transport> Transport for CircuitBreakerTransport<T> {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        if !self.breaker.can_proceed() {
            debug!("circuit open, rejecting request");
            return Err(TransportError::new(
                TransportErrorKind::Other,
                "circuit breaker open",
            ));
        }
        match self.inner.send(request).await {
            Ok(response) if response.status.is_server_error() => {
                self.breaker.record_failure();
                Ok(response)
            }
            Ok(response) => {
                self.breaker.record_success();
                Ok(response)
            }
            Err(err) => {
                self.breaker.record_failure();
                if self.breaker.current_state() == BreakerState::Open {
                    warn!(error = %err, "circuit breaker opened");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HeaderMap, Method, OutboundBody, StatusCode};
    use std::sync::atomic::AtomicU32;
    use url::Url;

    struct Scripted {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::new(TransportErrorKind::Connect, "refused"));
            }
            Ok(TransportResponse::from_bytes(StatusCode::OK, HeaderMap::new(), request.url, "ok"))
        }
    }

    fn request() -> OutboundRequest {
        OutboundRequest {
            method: Method::GET,
            url: Url::parse("https://api.test/").unwrap(),
            headers: HeaderMap::new(),
            body: OutboundBody::Empty,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(5, Duration::from_millis(100));
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available_tokens(), 0);

        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(1, Duration::from_millis(100));
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(!limiter.acquire(Duration::from_millis(50)).await);

        let start = Instant::now();
        assert!(limiter.acquire(Duration::from_secs(1)).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(100));
        assert_eq!(breaker.current_state(), BreakerState::Closed);
        assert!(breaker.can_proceed());

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.current_state(), BreakerState::Open);
        assert!(!breaker.can_proceed());

        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(breaker.can_proceed());
        assert_eq!(breaker.current_state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.current_state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(11)).await;
        assert!(breaker.can_proceed());
        breaker.record_failure();
        assert_eq!(breaker.current_state(), BreakerState::Open);
        assert!(!breaker.can_proceed());
    }

    #[tokio::test]
    async fn test_breaker_transport_short_circuits() {
        let transport = CircuitBreakerTransport::new(
            Scripted {
                calls: AtomicU32::new(0),
                fail: true,
            },
            CircuitBreaker::new(2, Duration::from_secs(60)),
        );
        for _ in 0..2 {
            let err = transport.send(request()).await.unwrap_err();
            assert_eq!(err.kind, TransportErrorKind::Connect);
        }
        let err = transport.send(request()).await.unwrap_err();
        assert!(err.message.contains("circuit breaker open"));
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_transport_rejects_when_budget_short() {
        let transport = RateLimitedTransport::new(
            Scripted {
                calls: AtomicU32::new(0),
                fail: false,
            },
            Arc::new(RateLimiter::new(1, Duration::from_secs(10))),
        )
        .with_max_wait(Duration::from_millis(10));

        assert!(transport.send(request()).await.is_ok());
        let err = transport.send(request()).await.unwrap_err();
        assert!(err.message.contains("rate limit"));
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 1);
    }
}
