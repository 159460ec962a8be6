//! Wiremock startup that tolerates sandboxes without localhost sockets.

#![allow(dead_code)]

use std::net::TcpListener;

use wiremock::MockServer;

/// When set to `1`/`true`/`yes`, a missing localhost socket fails the test.
const REQUIRE_ENV: &str = "SHARELINK_REQUIRE_SOCKET_TESTS";

fn localhost_available() -> bool {
    TcpListener::bind(("127.0.0.1", 0)).is_ok()
}

fn sockets_required() -> bool {
    std::env::var(REQUIRE_ENV).is_ok_and(|value| {
        matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
    })
}

/// Starts a mock server, or returns `None` when localhost cannot be bound.
pub async fn start_mock_server_or_skip() -> Option<MockServer> {
    if localhost_available() {
        return Some(MockServer::start().await);
    }
    assert!(
        !sockets_required(),
        "cannot bind a localhost socket and {REQUIRE_ENV} is set"
    );
    eprintln!(
        "skipping wiremock test: cannot bind a localhost socket \
         (set {REQUIRE_ENV}=1 to fail instead)"
    );
    None
}

/// Binds a raw localhost listener, or returns `None` when that is not possible.
pub async fn bind_local_listener_or_skip() -> Option<tokio::net::TcpListener> {
    match tokio::net::TcpListener::bind(("127.0.0.1", 0)).await {
        Ok(listener) => Some(listener),
        Err(error) => {
            assert!(
                !sockets_required(),
                "cannot bind a localhost socket ({error}) and {REQUIRE_ENV} is set"
            );
            eprintln!("skipping socket test: cannot bind a localhost socket: {error}");
            None
        }
    }
}

/// Value returned by a test body that was skipped.
pub fn socket_skip_return() {}
