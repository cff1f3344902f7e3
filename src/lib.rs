//! # Task Tracker
//!
//! A project/task tracker HTTP service built with Axum, whose interesting
//! part is the request pipeline in front of the handlers:
//!
//! - **Rate limiting**: fixed window per client key, `X-Limit-Remaining` on
//!   every response, 429 with `Retry-After` once exhausted
//! - **Authorization**: bearer token gate; writes need an identity
//! - **Idempotency**: `Idempotency-Key` deduplicates retried creations
//! - **Observability**: request ids, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → Metrics → Rate Limit → Auth           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, projects, tasks) + Idempotency Cache     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  In-memory Collections (one lock each)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use task_tracker::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state);
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! RATE_LIMIT_REQUESTS=100 RATE_LIMIT_WINDOW_SECS=30 AUTH_TOKEN=s3cret cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
