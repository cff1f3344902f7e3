//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Generates X-Request-Id when absent, echoes it back
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← One span per request, carrying the request id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Metrics      │ ← Request duration histogram
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers, rate limit headers exposed
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if the client key's window is exhausted
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authorization   │ ← 401 if a credential is present but wrong
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← 413 if the body is too large
//! └────────┬─────────┘
//!          ▼
//!      Handler (idempotency, write authorization)
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Health check
//! - `/api/v1` - Projects and tasks
//! - `/api/v2` - As v1, plus task priority and task list filters

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Request};
use axum::middleware::from_fn;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span};

use crate::handlers;
use crate::metrics::track_request_duration;
use crate::middleware::{
    LIMIT_REMAINING_HEADER, RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_RESET_HEADER, RateLimitLayer,
};
use crate::state::AppState;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with all routes and middleware configured.
///
/// Rate limiting is skipped when the state carries no limiter
/// (`RATE_LIMIT_REQUESTS=0`). The authorization gate is always installed.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(&config.cors_allowed_origins);

    // =========================================================================
    // Build Router with Routes
    // =========================================================================
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api_v1())
        .nest("/api/v2", api_v2());

    // =========================================================================
    // Apply Middleware Stack (last added runs first)
    // =========================================================================

    info!(
        max_size_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    router = router.layer(state.auth.clone());

    match &state.rate_limiter {
        Some(limiter) => {
            info!(
                limit = limiter.limit(),
                window_secs = limiter.window().as_secs(),
                "Rate limiting enabled"
            );
            router = router.layer(RateLimitLayer::new(limiter.clone()));
        }
        None => info!("Rate limiting disabled (RATE_LIMIT_REQUESTS=0)"),
    }

    // CORS wraps rate limiting and auth: their rejections carry CORS headers,
    // and preflights are answered here without touching any quota
    router = router
        .layer(cors)
        .layer(from_fn(track_request_duration))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    router.with_state(state)
}

fn api_v1() -> Router<AppState> {
    Router::new()
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{project_id}",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route(
            "/projects/{project_id}/tasks",
            get(handlers::list_tasks_v1).post(handlers::create_task_v1),
        )
        .route(
            "/tasks/{task_id}",
            get(handlers::get_task)
                .put(handlers::update_task_v1)
                .delete(handlers::delete_task),
        )
}

fn api_v2() -> Router<AppState> {
    Router::new()
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{project_id}",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route(
            "/projects/{project_id}/tasks",
            get(handlers::list_tasks_v2).post(handlers::create_task_v2),
        )
        .route(
            "/tasks/{task_id}",
            get(handlers::get_task)
                .put(handlers::update_task_v2)
                .delete(handlers::delete_task),
        )
}

/// Span for one HTTP request, tagged with the id set by `SetRequestIdLayer`.
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
    )
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin; otherwise only the listed origins. The rate limit
/// headers are exposed so browser clients can read them.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let exposed = [
        HeaderName::from_static(LIMIT_REMAINING_HEADER),
        HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
        HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
        HeaderName::from_static("retry-after"),
        HeaderName::from_static(REQUEST_ID_HEADER),
    ];

    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(exposed);

    if allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}
