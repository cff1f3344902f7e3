//! HTTP middleware guarding the resource routes.
//!
//! - **Client key**: derives the per-requester key used for quotas
//! - **Rate Limiting**: fixed-window quota per client key
//! - **Authorization**: bearer token gate that annotates the request identity
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID / Trace / Metrics → Rate Limiter → Auth → Handler
//!                                               ↓            ↓
//!                                         429 Too Many   401 Unauth
//! ```
//!
//! Each rejecting stage short-circuits everything after it. The idempotency
//! check is not a layer; creation handlers run it themselves.

pub mod auth;
pub mod client_key;
pub mod rate_limit;

pub use auth::{AuthRejection, AuthenticatedUser, BearerAuth, Identity, parse_bearer};
pub use client_key::{
    FORWARDED_FOR_HEADER, UNKNOWN_CLIENT, client_key_from_parts, resolve_client_key,
};
pub use rate_limit::{
    Admission, Clock, LIMIT_REMAINING_HEADER, MAX_WINDOW, ManualClock, RATE_LIMIT_LIMIT_HEADER,
    RATE_LIMIT_RESET_HEADER, RateLimitError, RateLimitLayer, RateLimiter, SystemClock,
};
