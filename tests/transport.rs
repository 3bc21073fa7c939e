mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{serve, Reply};
use inkwell::error::NetworkError;
use inkwell::transport::{Fetch, RetryPolicy, Transport};

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
    }
}

#[test]
fn sequential_requests_respect_the_delay() {
    let server = serve(|_| Reply::html("ok"));
    let delay = Duration::from_millis(150);
    let transport = Transport::builder().delay(delay).build().unwrap();

    let started = Instant::now();
    for i in 0..4 {
        assert_eq!(transport.get(&server.url(&format!("/page/{}", i))).unwrap(), "ok");
    }
    assert!(started.elapsed() >= delay * 3, "elapsed {:?}", started.elapsed());
    assert_eq!(server.hits().len(), 4);
}

#[test]
fn transient_failures_are_retried() {
    let calls = AtomicUsize::new(0);
    let server = serve(move |_| {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Reply::status(503)
        } else {
            Reply::html("recovered")
        }
    });
    let transport = Transport::builder()
        .delay(Duration::ZERO)
        .retry_policy(fast_retries())
        .build()
        .unwrap();

    assert_eq!(transport.get(&server.url("/flaky")).unwrap(), "recovered");
    assert_eq!(server.hits().len(), 3);
}

#[test]
fn client_errors_are_not_retried() {
    let server = serve(|_| Reply::status(404));
    let transport = Transport::builder()
        .delay(Duration::ZERO)
        .retry_policy(fast_retries())
        .build()
        .unwrap();

    let err = transport.get(&server.url("/missing")).unwrap_err();
    assert!(matches!(err, NetworkError::HttpStatus { status: 404, .. }));
    assert_eq!(server.hits().len(), 1);
}

#[test]
fn rate_limit_responses_exhaust_attempts() {
    let server = serve(|_| Reply::status(429));
    let transport = Transport::builder()
        .delay(Duration::ZERO)
        .retry_policy(fast_retries())
        .build()
        .unwrap();

    let err = transport.get_bytes(&server.url("/busy")).unwrap_err();
    assert!(err.is_rate_limit());
    assert_eq!(server.hits().len(), 3);
}
