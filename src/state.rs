//! Shared application state for Axum handlers and middleware.
//!
//! One `AppState` owns every piece of process-wide mutable state:
//!
//! - **Resources**: the project and task collections
//! - **Idempotency cache**: key to created resource id
//! - **Rate limiter**: client key to rate window (absent when disabled)
//! - **Authorization gate**: the accepted token and its principal
//!
//! Each map has its own lock. Cloning the state only clones `Arc`s, so every
//! handler sees the same maps, and a fresh `AppState` is a fresh world (tests
//! build one per case).
//!
//! # Structured Concurrency
//!
//! The expired-window sweeper is spawned on a `tokio_util::task::TaskTracker`
//! and stopped through a `CancellationToken`. Call `shutdown()` before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyCache;
use crate::metrics;
use crate::middleware::{BearerAuth, Clock, RateLimiter, SystemClock};
use crate::models::{Project, Task};
use crate::store::Collection;

/// Shared application state.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub projects: Arc<Collection<Project>>,
    pub tasks: Arc<Collection<Task>>,
    pub idempotency: Arc<IdempotencyCache>,
    /// `None` when `RATE_LIMIT_REQUESTS=0`
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub auth: BearerAuth,
    /// Timestamp when the state was created
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state using the system clock.
    ///
    /// Must be called inside a Tokio runtime when the sweeper is enabled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the rate limit settings are unusable.
    pub fn new(config: Config) -> AppResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create application state whose rate limiter reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the rate limit settings are unusable.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let rate_limiter = if config.rate_limiting_enabled() {
            let limiter = RateLimiter::with_clock(
                config.rate_limit_requests,
                config.rate_limit_window,
                clock,
            )
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
            Some(Arc::new(limiter))
        } else {
            None
        };

        let auth = BearerAuth::new(config.auth_token.clone(), config.auth_principal.clone());

        let state = Self {
            config: Arc::new(config),
            projects: Arc::new(Collection::new()),
            tasks: Arc::new(Collection::new()),
            idempotency: Arc::new(IdempotencyCache::new()),
            rate_limiter,
            auth,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.sweeper_enabled() {
            state.spawn_window_sweeper();
        }

        Ok(state)
    }

    /// Spawn the background task evicting expired rate windows.
    ///
    /// Holds only the limiter, not the whole state.
    fn spawn_window_sweeper(&self) {
        let Some(limiter) = self.rate_limiter.clone() else {
            return;
        };
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Window sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_expired().await;
                        let tracked = limiter.tracked_clients().await;
                        metrics::set_tracked_clients(tracked);
                        trace!(evicted, tracked, "Swept expired rate windows");
                    }
                }
            }

            debug!("Window sweeper shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals cancellation, closes the tracker and waits for every task.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Period of the window sweeper, if it runs.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.config
            .sweeper_enabled()
            .then_some(self.config.rate_limit_sweep_interval)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::ManualClock;

    #[tokio::test]
    async fn test_new_state_is_empty() {
        let state = AppState::new(Config::default()).unwrap();

        assert!(state.projects.is_empty().await);
        assert!(state.tasks.is_empty().await);
        assert_eq!(state.idempotency.len().await, 0);
        assert!(state.rate_limiter.is_some());

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_rate_limiting_disabled() {
        let config = Config {
            rate_limit_requests: 0,
            ..Config::default()
        };
        let state = AppState::new(config).unwrap();

        assert!(state.rate_limiter.is_none());
        assert_eq!(state.sweep_interval(), None);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let state = AppState::new(Config::default()).unwrap();
        let clone = state.clone();

        clone
            .projects
            .insert(Project::new("shared".to_string(), String::new()))
            .await;
        assert_eq!(state.projects.len().await, 1);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_windows() {
        let config = Config {
            rate_limit_sweep_interval: Duration::from_millis(20),
            ..Config::default()
        };
        let clock = Arc::new(ManualClock::new());
        let state = AppState::with_clock(config, clock.clone()).unwrap();
        let limiter = state.rate_limiter.clone().unwrap();

        limiter.admit("10.0.0.1").await;
        assert_eq!(limiter.tracked_clients().await, 1);

        clock.advance(Duration::from_secs(61));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(limiter.tracked_clients().await, 0);
        state.shutdown().await;
    }
}
