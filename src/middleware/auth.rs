//! Bearer token authorization gate.
//!
//! The gate resolves *who* is calling; it does not decide what they may do.
//!
//! | `Authorization` header              | Outcome                                |
//! |-------------------------------------|----------------------------------------|
//! | absent                              | proceed, [`Identity::Anonymous`]       |
//! | not `Bearer <token>`                | 401, request ends here                 |
//! | `Bearer <other>`                    | 401, request ends here                 |
//! | `Bearer <accepted token>`           | proceed, [`Identity::Authenticated`]   |
//!
//! The resolved identity is stored in the request extensions. Handlers that
//! mutate state take an [`AuthenticatedUser`] argument, which rejects
//! anonymous callers with 401.
//!
//! The scheme is matched case-insensitively; the token is compared in
//! constant time.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::client_key::resolve_client_key;
use crate::error::AppError;
use crate::metrics;

/// Identity resolved for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No credential was presented.
    Anonymous,
    /// The accepted token was presented.
    Authenticated { principal: String },
}

impl Identity {
    pub fn principal(&self) -> Option<&str> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated { principal } => Some(principal),
        }
    }
}

/// Why the gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// Header present but not a two-part `Bearer <token>` value.
    MalformedHeader,
    /// Well-formed header carrying a token that is not accepted.
    InvalidToken,
}

impl AuthRejection {
    fn reason(self) -> &'static str {
        match self {
            AuthRejection::MalformedHeader => "malformed_header",
            AuthRejection::InvalidToken => "invalid_token",
        }
    }

    fn message(self) -> &'static str {
        match self {
            AuthRejection::MalformedHeader => "Invalid authorization header",
            AuthRejection::InvalidToken => "Invalid token",
        }
    }
}

/// Split an `Authorization` value into its bearer token.
///
/// Only the first space separates scheme from token, so `"Bearer  x"` yields
/// the token `" x"`.
pub fn parse_bearer(value: &str) -> Result<&str, AuthRejection> {
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthRejection::MalformedHeader),
    }
}

/// Bearer token authorization layer.
#[derive(Clone)]
pub struct BearerAuth {
    token: Arc<String>,
    principal: Arc<String>,
}

impl BearerAuth {
    /// Create a gate accepting exactly `token` and resolving it to `principal`.
    pub fn new(token: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            token: Arc::new(token.into()),
            principal: Arc::new(principal.into()),
        }
    }

    /// Resolve the identity carried by `headers`.
    ///
    /// # Errors
    ///
    /// Returns `AuthRejection` when a credential is present but unusable.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<Identity, AuthRejection> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(Identity::Anonymous);
        };

        let value = value
            .to_str()
            .map_err(|_| AuthRejection::MalformedHeader)?;
        let token = parse_bearer(value)?;

        if constant_time_eq(token, &self.token) {
            Ok(Identity::Authenticated {
                principal: self.principal.as_str().to_owned(),
            })
        } else {
            Err(AuthRejection::InvalidToken)
        }
    }
}

impl<S> Layer<S> for BearerAuth {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            gate: self.clone(),
        }
    }
}

/// Authorization service wrapper.
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    gate: BearerAuth,
}

impl<S> Service<Request<Body>> for BearerAuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let outcome = self.gate.authorize(req.headers());
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match outcome {
                Ok(identity) => {
                    debug!(principal = ?identity.principal(), "Identity resolved");
                    req.extensions_mut().insert(identity);
                    inner.call(req).await
                }
                Err(rejection) => {
                    warn!(
                        client_key = %resolve_client_key(&req),
                        path = %req.uri().path(),
                        reason = rejection.reason(),
                        "Authorization rejected"
                    );
                    metrics::record_auth_rejection(rejection.reason());
                    Ok(unauthorized_response(rejection.message()))
                }
            }
        })
    }
}

/// Perform constant-time comparison of two strings.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Build an unauthorized (401) response.
fn unauthorized_response(message: &str) -> Response<Body> {
    (
        StatusCode::UNAUTHORIZED,
        [("www-authenticate", "Bearer")],
        Json(json!({ "error": "unauthorized", "message": message })),
    )
        .into_response()
}

// =============================================================================
// Extractors
// =============================================================================

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Identity>()
            .cloned()
            .unwrap_or(Identity::Anonymous))
    }
}

/// Extractor for handlers that require an authenticated caller.
///
/// Rejects anonymous requests with 401 before the body is read.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await {
            Ok(Identity::Authenticated { principal }) => Ok(Self(principal)),
            Ok(Identity::Anonymous) | Err(_) => {
                metrics::record_auth_rejection("missing_credentials");
                Err(AppError::Unauthorized("Authentication required".to_string()))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn gate() -> BearerAuth {
        BearerAuth::new("demo-token", "demo-user")
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_no_header_is_anonymous() {
        assert_eq!(gate().authorize(&HeaderMap::new()), Ok(Identity::Anonymous));
    }

    #[test]
    fn test_valid_token_is_authenticated() {
        let identity = gate().authorize(&headers_with("Bearer demo-token")).unwrap();
        assert_eq!(identity.principal(), Some("demo-user"));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        assert!(gate().authorize(&headers_with("bearer demo-token")).is_ok());
        assert!(gate().authorize(&headers_with("BEARER demo-token")).is_ok());
    }

    #[test]
    fn test_wrong_token_rejected() {
        assert_eq!(
            gate().authorize(&headers_with("Bearer other-token")),
            Err(AuthRejection::InvalidToken)
        );
    }

    #[test]
    fn test_empty_token_rejected_as_invalid() {
        assert_eq!(
            gate().authorize(&headers_with("Bearer ")),
            Err(AuthRejection::InvalidToken)
        );
    }

    #[test]
    fn test_single_part_header_is_malformed() {
        assert_eq!(
            gate().authorize(&headers_with("demo-token")),
            Err(AuthRejection::MalformedHeader)
        );
        assert_eq!(
            gate().authorize(&headers_with("Bearer")),
            Err(AuthRejection::MalformedHeader)
        );
    }

    #[test]
    fn test_other_scheme_is_malformed() {
        assert_eq!(
            gate().authorize(&headers_with("Basic ZGVtbzpkZW1v")),
            Err(AuthRejection::MalformedHeader)
        );
    }

    #[test]
    fn test_parse_bearer_keeps_extra_spaces_in_token() {
        assert_eq!(parse_bearer("Bearer  demo-token"), Ok(" demo-token"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret123", "secret123"));
        assert!(!constant_time_eq("secret123", "secret456"));
        assert!(!constant_time_eq("short", "much-longer-string"));
    }

    #[test]
    fn test_unauthorized_response() {
        let response = unauthorized_response("Invalid token");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
    }

    #[tokio::test]
    async fn test_authenticated_user_rejects_anonymous() {
        let (mut parts, ()) = Request::builder().body(()).unwrap().into_parts();
        let result = AuthenticatedUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_authenticated_user_reads_extension() {
        let (mut parts, ()) = Request::builder().body(()).unwrap().into_parts();
        parts.extensions.insert(Identity::Authenticated {
            principal: "demo-user".to_string(),
        });

        let AuthenticatedUser(principal) = AuthenticatedUser::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(principal, "demo-user");
    }
}
