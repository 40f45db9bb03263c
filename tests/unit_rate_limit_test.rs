use glossd::core::rate_limit::RateLimiter;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const WINDOW: Duration = Duration::from_millis(80);

fn ip(last_octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet))
}

#[test]
fn test_first_request_is_allowed() {
    let limiter = RateLimiter::new();
    assert!(limiter.allowed(ip(1), "/last_modified", WINDOW));
}

#[test]
fn test_second_request_within_window_is_denied() {
    let limiter = RateLimiter::new();
    assert!(limiter.allowed(ip(1), "/last_modified", WINDOW));
    assert!(!limiter.allowed(ip(1), "/last_modified", WINDOW));
}

#[test]
fn test_allow_deny_allow_across_window_boundary() {
    let limiter = RateLimiter::new();
    assert!(limiter.allowed(ip(1), "/last_modified", WINDOW));
    assert!(!limiter.allowed(ip(1), "/last_modified", WINDOW));
    std::thread::sleep(WINDOW + Duration::from_millis(20));
    assert!(limiter.allowed(ip(1), "/last_modified", WINDOW));
}

#[test]
fn test_denied_request_does_not_extend_window() {
    let limiter = RateLimiter::new();
    assert!(limiter.allowed(ip(1), "/last_modified", WINDOW));
    std::thread::sleep(Duration::from_millis(50));
    // Denied: only 50ms elapsed.
    assert!(!limiter.allowed(ip(1), "/last_modified", WINDOW));
    std::thread::sleep(Duration::from_millis(50));
    // Allowed: 100ms since the last ALLOWED request, even though a denied
    // attempt happened in between.
    assert!(limiter.allowed(ip(1), "/last_modified", WINDOW));
}

#[test]
fn test_keys_are_independent() {
    let limiter = RateLimiter::new();
    assert!(limiter.allowed(ip(1), "/last_modified", WINDOW));
    // Different IP, same endpoint.
    assert!(limiter.allowed(ip(2), "/last_modified", WINDOW));
    // Same IP, different endpoint.
    assert!(limiter.allowed(ip(1), "/annotation", WINDOW));
    // Original key is still limited.
    assert!(!limiter.allowed(ip(1), "/last_modified", WINDOW));
}

#[test]
fn test_tracked_keys_grow_per_key() {
    let limiter = RateLimiter::new();
    for octet in 0..10 {
        limiter.allowed(ip(octet), "/last_modified", WINDOW);
    }
    assert_eq!(limiter.tracked_keys(), 10);
}
