//! Per-client rate limiting with a fixed, reset-on-expiry window.
//!
//! # Algorithm
//!
//! Each client key owns one `RateWindow` `{ remaining, reset_at }`:
//!
//! - No window, or `now >= reset_at`: a fresh window replaces it with
//!   `remaining = limit - 1` and `reset_at = now + window`. Admitted.
//! - `remaining > 0`: decremented. Admitted.
//! - Otherwise: rejected until `reset_at`.
//!
//! The whole read/replace/decrement sequence runs under one lock, so
//! concurrent requests from the same key never observe the same `remaining`.
//! A client can fit up to `2 * limit` requests across a window boundary;
//! that is the price of O(1) state per key.
//!
//! # Response Headers
//!
//! Admitted:
//! - `X-Limit-Remaining`: Requests left in the current window
//! - `X-RateLimit-Reset`: Seconds until the window resets
//! - `X-RateLimit-Limit`: Configured limit
//!
//! Rejected (429):
//! - `X-Limit-Remaining: 0`
//! - `Retry-After`: Seconds until the window resets
//! - `X-RateLimit-Limit`: Configured limit
//!
//! # Memory
//!
//! Windows are never removed by [`RateLimiter::admit`]. Long-running processes
//! should call [`RateLimiter::evict_expired`] periodically; `AppState` runs a
//! background sweeper for this.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::client_key::resolve_client_key;
use crate::metrics;

/// Remaining requests in the current window.
pub const LIMIT_REMAINING_HEADER: &str = "x-limit-remaining";

/// Seconds until the current window resets (admitted responses only).
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Configured requests per window.
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Longest accepted window length (one day).
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// The limit must admit at least one request per window.
    #[error("rate limit must be greater than 0; disable rate limiting instead")]
    ZeroLimit,
    /// The window must have a non-zero length.
    #[error("rate limit window must be longer than zero")]
    ZeroWindow,
    /// The window is longer than [`MAX_WINDOW`].
    #[error("rate limit window must not exceed {} seconds", MAX_WINDOW.as_secs())]
    WindowTooLong,
}

// =============================================================================
// Clock
// =============================================================================

/// Time source for window expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Used to exercise window expiry without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Limiter
// =============================================================================

/// Quota state for one client key.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    remaining: u32,
    reset_at: Instant,
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    Allowed {
        remaining: u32,
        reset_after: Duration,
    },
    /// The client exhausted its window.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    /// Requests left in the window after this one (0 when rejected).
    pub fn remaining(&self) -> u32 {
        match self {
            Admission::Allowed { remaining, .. } => *remaining,
            Admission::Rejected { .. } => 0,
        }
    }
}

/// Round a duration up to whole seconds.
pub fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// In-memory fixed-window rate limiter keyed by client key.
pub struct RateLimiter {
    limit: NonZeroU32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    /// Create a limiter admitting `limit` requests per `window` per client key.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if `limit` or `window` is zero, or if `window`
    /// exceeds [`MAX_WINDOW`].
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        Self::with_clock(limit, window, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if `limit` or `window` is zero, or if `window`
    /// exceeds [`MAX_WINDOW`].
    pub fn with_clock(
        limit: u32,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateLimitError> {
        let limit = NonZeroU32::new(limit).ok_or(RateLimitError::ZeroLimit)?;
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        if window > MAX_WINDOW {
            return Err(RateLimitError::WindowTooLong);
        }

        Ok(Self {
            limit,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one request from `client_key`.
    pub async fn admit(&self, client_key: &str) -> Admission {
        let mut windows = self.windows.lock().await;
        // Read the clock under the lock so per-key decisions stay ordered
        let now = self.clock.now();

        if let Some(window) = windows
            .get_mut(client_key)
            .filter(|window| now < window.reset_at)
        {
            let until_reset = window.reset_at - now;
            if window.remaining == 0 {
                return Admission::Rejected {
                    retry_after: until_reset,
                };
            }
            window.remaining -= 1;
            return Admission::Allowed {
                remaining: window.remaining,
                reset_after: until_reset,
            };
        }

        let fresh = RateWindow {
            remaining: self.limit.get() - 1,
            reset_at: now + self.window,
        };
        windows.insert(client_key.to_owned(), fresh);

        Admission::Allowed {
            remaining: fresh.remaining,
            reset_after: self.window,
        }
    }

    /// Drop every window that has expired, returning how many were removed.
    ///
    /// An expired window would be replaced on the next `admit` anyway, so
    /// eviction never changes an admission decision.
    pub async fn evict_expired(&self) -> usize {
        let mut windows = self.windows.lock().await;
        let now = self.clock.now();
        let before = windows.len();
        windows.retain(|_, window| now < window.reset_at);
        before - windows.len()
    }

    /// Number of client keys currently holding a window.
    pub async fn tracked_clients(&self) -> usize {
        self.windows.lock().await.len()
    }
}

// =============================================================================
// Tower Middleware
// =============================================================================

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(RateLimiter::new(60, Duration::from_secs(60))?);
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(limiter));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        // Resolve before moving req into the future
        let client_key = resolve_client_key(&req).into_owned();

        Box::pin(async move {
            let limit = limiter.limit();

            match limiter.admit(&client_key).await {
                Admission::Allowed {
                    remaining,
                    reset_after,
                } => {
                    debug!(client_key = %client_key, remaining, "Request admitted");

                    let mut response = inner.call(req).await?;
                    let headers = response.headers_mut();
                    headers.insert(LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
                    headers.insert(
                        RATE_LIMIT_RESET_HEADER,
                        HeaderValue::from(ceil_secs(reset_after)),
                    );
                    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(limit));
                    Ok(response)
                }
                Admission::Rejected { retry_after } => {
                    let retry_after = ceil_secs(retry_after);

                    warn!(
                        client_key = %client_key,
                        path = %req.uri().path(),
                        retry_after_secs = retry_after,
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limit_rejection();

                    Ok(too_many_requests_response(limit, retry_after))
                }
            }
        })
    }
}

/// Build the terminal 429 response.
fn too_many_requests_response(limit: u32, retry_after: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            ("retry-after", retry_after.to_string()),
            (LIMIT_REMAINING_HEADER, "0".to_string()),
            (RATE_LIMIT_LIMIT_HEADER, limit.to_string()),
        ],
        Json(json!({
            "error": "too_many_requests",
            "message": "Rate limit exceeded. Please retry later.",
        })),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn limiter_with_clock(limit: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter =
            RateLimiter::with_clock(limit, Duration::from_secs(60), clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_zero_limit_returns_error() {
        let result = RateLimiter::new(0, Duration::from_secs(60));
        assert!(matches!(result, Err(RateLimitError::ZeroLimit)));
    }

    #[test]
    fn test_zero_window_returns_error() {
        let result = RateLimiter::new(60, Duration::ZERO);
        assert!(matches!(result, Err(RateLimitError::ZeroWindow)));
    }

    #[tokio::test]
    async fn test_window_longer_than_a_day_returns_error() {
        let result = RateLimiter::new(60, Duration::from_secs(u64::MAX));
        assert!(matches!(result, Err(RateLimitError::WindowTooLong)));

        let longest = RateLimiter::new(60, MAX_WINDOW).unwrap();
        let admission = longest.admit("10.0.0.1").await;
        assert_eq!(
            admission,
            Admission::Allowed {
                remaining: 59,
                reset_after: MAX_WINDOW,
            }
        );
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_secs(60)), 60);
        assert_eq!(ceil_secs(Duration::from_millis(59_001)), 60);
        assert_eq!(ceil_secs(Duration::from_nanos(1)), 1);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_first_request_opens_window() {
        let (limiter, _clock) = limiter_with_clock(60);

        let admission = limiter.admit("10.0.0.1").await;
        assert_eq!(
            admission,
            Admission::Allowed {
                remaining: 59,
                reset_after: Duration::from_secs(60),
            }
        );
    }

    #[tokio::test]
    async fn test_exhausted_window_rejects() {
        let (limiter, clock) = limiter_with_clock(60);

        for expected in (0..60).rev() {
            let admission = limiter.admit("10.0.0.1").await;
            assert_eq!(admission.remaining(), expected);
            assert!(admission.is_allowed());
        }

        clock.advance(Duration::from_millis(4_500));
        match limiter.admit("10.0.0.1").await {
            Admission::Rejected { retry_after } => {
                assert_eq!(retry_after, Duration::from_millis(55_500));
                assert_eq!(ceil_secs(retry_after), 56);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_does_not_consume_quota_of_other_keys() {
        let (limiter, _clock) = limiter_with_clock(1);

        assert!(limiter.admit("a").await.is_allowed());
        assert!(!limiter.admit("a").await.is_allowed());
        assert!(limiter.admit("b").await.is_allowed());
    }

    #[tokio::test]
    async fn test_expired_window_is_replaced() {
        let (limiter, clock) = limiter_with_clock(3);

        for _ in 0..3 {
            limiter.admit("client").await;
        }
        assert!(!limiter.admit("client").await.is_allowed());

        // Exactly at reset_at the window counts as expired
        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.admit("client").await.remaining(), 2);
    }

    #[tokio::test]
    async fn test_partially_used_window_resets_fully() {
        let (limiter, clock) = limiter_with_clock(60);

        limiter.admit("client").await;
        limiter.admit("client").await;
        clock.advance(Duration::from_secs(61));

        assert_eq!(limiter.admit("client").await.remaining(), 59);
    }

    #[tokio::test]
    async fn test_reset_after_counts_down() {
        let (limiter, clock) = limiter_with_clock(60);

        limiter.admit("client").await;
        clock.advance(Duration::from_secs(15));

        match limiter.admit("client").await {
            Admission::Allowed { reset_after, .. } => {
                assert_eq!(reset_after, Duration::from_secs(45));
            }
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_evict_expired_keeps_live_windows() {
        let (limiter, clock) = limiter_with_clock(60);

        limiter.admit("old").await;
        clock.advance(Duration::from_secs(30));
        limiter.admit("young").await;
        clock.advance(Duration::from_secs(30));

        assert_eq!(limiter.evict_expired().await, 1);
        assert_eq!(limiter.tracked_clients().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_observe_distinct_remaining() {
        let (limiter, _clock) = limiter_with_clock(60);
        let limiter = Arc::new(limiter);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..60 {
            let limiter = limiter.clone();
            tasks.spawn(async move { limiter.admit("shared").await });
        }

        let mut seen = Vec::new();
        while let Some(result) = tasks.join_next().await {
            let admission = result.unwrap();
            assert!(admission.is_allowed());
            seen.push(admission.remaining());
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..60).collect::<Vec<u32>>());
        assert!(!limiter.admit("shared").await.is_allowed());
    }

    #[test]
    fn test_too_many_requests_response_headers() {
        let response = too_many_requests_response(60, 42);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "42");
        assert_eq!(response.headers().get("x-limit-remaining").unwrap(), "0");
        assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "60");
    }
}
