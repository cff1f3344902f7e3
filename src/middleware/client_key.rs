//! Client key resolution for per-client rate limiting.
//!
//! A client key approximates "one requester". It is derived from:
//!
//! 1. The first entry of `X-Forwarded-For`, trimmed (invalid UTF-8 bytes are
//!    replaced with U+FFFD rather than discarding the header)
//! 2. Otherwise the host part of the transport peer address
//! 3. Otherwise the shared [`UNKNOWN_CLIENT`] key
//!
//! Resolution never fails.
//!
//! # Security Warning: Spoofing
//!
//! `X-Forwarded-For` is taken at face value. A client talking to this service
//! directly can claim any key it likes, which lets it dodge its own quota or
//! burn somebody else's. Deploy behind a reverse proxy that overwrites the
//! header (`proxy_set_header X-Forwarded-For $remote_addr;` in nginx) and block
//! direct access.
//!
//! The peer address is only known when the server is run with
//! `into_make_service_with_connect_info::<SocketAddr>()`; without it every
//! request lacking the header shares the `"unknown"` key.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Header carrying the client-declared originating address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Fallback key shared by all requests whose origin cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the client key for a request.
///
/// Returns `Cow::Borrowed` only for the [`UNKNOWN_CLIENT`] fallback; call
/// `.into_owned()` when the key has to outlive the request.
#[inline]
pub fn resolve_client_key<B>(req: &Request<B>) -> Cow<'static, str> {
    let forwarded_for = req
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()));
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    client_key_from_parts(forwarded_for.as_deref(), peer)
}

/// Derive a client key from a raw `X-Forwarded-For` value and a peer address.
///
/// A header whose first entry is blank is treated as absent.
pub fn client_key_from_parts(
    forwarded_for: Option<&str>,
    peer: Option<SocketAddr>,
) -> Cow<'static, str> {
    let first_forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|entry| !entry.is_empty());

    match (first_forwarded, peer) {
        (Some(entry), _) => Cow::Owned(entry.to_string()),
        (None, Some(addr)) => Cow::Owned(addr.ip().to_string()),
        (None, None) => Cow::Borrowed(UNKNOWN_CLIENT),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn test_first_forwarded_entry_wins() {
        let key = client_key_from_parts(Some("192.168.1.1, 10.0.0.1"), peer("127.0.0.1:5000"));
        assert_eq!(key, "192.168.1.1");
    }

    #[test]
    fn test_forwarded_entry_is_trimmed() {
        let key = client_key_from_parts(Some("  203.0.113.50  , 10.0.0.1"), None);
        assert_eq!(key, "203.0.113.50");
    }

    #[test]
    fn test_forwarded_entry_passed_through_verbatim() {
        // Not validated as an address; whatever the client declares is the key
        let key = client_key_from_parts(Some("192.168.1.1:8080"), None);
        assert_eq!(key, "192.168.1.1:8080");
    }

    #[test]
    fn test_peer_host_without_port() {
        let key = client_key_from_parts(None, peer("10.1.2.3:54321"));
        assert_eq!(key, "10.1.2.3");
    }

    #[test]
    fn test_peer_ipv6_host() {
        let key = client_key_from_parts(None, peer("[::1]:8080"));
        assert_eq!(key, "::1");
    }

    #[test]
    fn test_blank_forwarded_falls_back_to_peer() {
        let key = client_key_from_parts(Some("   "), peer("10.1.2.3:80"));
        assert_eq!(key, "10.1.2.3");

        let key = client_key_from_parts(Some(""), peer("10.1.2.3:80"));
        assert_eq!(key, "10.1.2.3");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let key = client_key_from_parts(None, None);
        assert_eq!(key, UNKNOWN_CLIENT);
        assert!(matches!(key, Cow::Borrowed(_)));
    }

    #[test]
    fn test_resolve_from_request_headers() {
        let req = Request::builder()
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(resolve_client_key(&req), "10.0.0.1");
    }

    #[test]
    fn test_resolve_non_utf8_forwarded_entry() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("172.16.0.9:40000".parse::<SocketAddr>().unwrap()));
        req.headers_mut().insert(
            FORWARDED_FOR_HEADER,
            axum::http::HeaderValue::from_bytes(b"10.0.0.\xff, 10.0.0.2").unwrap(),
        );

        assert_eq!(resolve_client_key(&req), "10.0.0.\u{FFFD}");
    }

    #[test]
    fn test_resolve_from_connect_info() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("172.16.0.9:40000".parse::<SocketAddr>().unwrap()));

        assert_eq!(resolve_client_key(&req), "172.16.0.9");
    }

    #[test]
    fn test_resolve_without_any_source() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(resolve_client_key(&req), "unknown");
    }
}
