//! Fuzz testing for everything derived from untrusted request input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_request_inputs -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - Validation of names, titles, descriptions, priorities and idempotency keys
//! - Client key derivation from `X-Forwarded-For` and a peer address
//! - Bearer token parsing of `Authorization` values

#![no_main]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use task_tracker::middleware::{client_key_from_parts, parse_bearer};
use task_tracker::validation::{
    validate_description, validate_idempotency_key, validate_priority, validate_project_name,
    validate_task_title,
};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    text: &'a str,
    priority: u8,
    forwarded_for: Option<&'a str>,
    peer: Option<([u8; 4], u16)>,
}

fuzz_target!(|input: Input<'_>| {
    let _ = validate_project_name(input.text);
    let _ = validate_task_title(input.text);
    let _ = validate_description(input.text);
    let _ = validate_priority(input.priority);
    let _ = validate_idempotency_key(input.text);

    let peer = input
        .peer
        .map(|(octets, port)| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port));
    let key = client_key_from_parts(input.forwarded_for, peer);
    assert!(!key.is_empty(), "client key must never be empty");
    assert_eq!(key.trim(), key.as_ref(), "client key must be trimmed");

    if let Ok(token) = parse_bearer(input.text) {
        let scheme = input.text.get(..6).unwrap_or_default();
        assert!(scheme.eq_ignore_ascii_case("bearer"));
        assert!(input.text.ends_with(token));
    }
});
