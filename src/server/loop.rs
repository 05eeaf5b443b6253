// Server loop module
// Accepts connections until shutdown is requested, then drains them

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::Instant;

use super::connection::accept_connection;
use super::signal::SignalHandler;
use crate::config::AppState;
use crate::logger;

/// How often the drain phase re-checks the active connection count
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run the accept loop on the current `LocalSet`.
///
/// Once `signals` reports a shutdown the listener is dropped, so no new
/// connections are accepted, and in-flight connections get up to
/// `performance.shutdown_grace_ms` to finish.
#[allow(clippy::ignored_unit_patterns)]
pub async fn run(
    listener: TcpListener,
    state: Arc<AppState>,
    signals: Arc<SignalHandler>,
) -> Result<(), Box<dyn std::error::Error>> {
    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(stream, peer_addr, &state, &active_connections);
                    }
                    Err(e) => {
                        logger::log_error(&format!("Failed to accept connection: {e}"));
                    }
                }
            }

            _ = signals.wait_for_shutdown() => break,
        }
    }

    drop(listener);
    let grace = Duration::from_millis(state.config.performance.shutdown_grace_ms);
    let remaining = drain_connections(&active_connections, grace).await;
    logger::log_shutdown_complete(remaining);
    Ok(())
}

/// Wait until no connections remain or `grace` elapses; returns how many are
/// still open.
async fn drain_connections(active: &AtomicUsize, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    let mut current = active.load(Ordering::SeqCst);
    logger::log_shutdown_started(current);

    while current > 0 && Instant::now() < deadline {
        tokio::time::sleep(DRAIN_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        current = active.load(Ordering::SeqCst);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_drain_returns_immediately_when_idle() {
        let active = AtomicUsize::new(0);
        let remaining = drain_connections(&active, Duration::from_secs(10)).await;
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace() {
        let active = AtomicUsize::new(2);
        let started = Instant::now();
        let remaining = drain_connections(&active, Duration::from_millis(200)).await;
        assert_eq!(remaining, 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                let config = Config::load_from("does-not-exist").unwrap();
                let state = Arc::new(AppState::new(&config, Arc::new(MemoryStore::default())));
                let signals = Arc::new(SignalHandler::new());

                let server = tokio::task::spawn_local(run(listener, state, Arc::clone(&signals)));

                let mut client = TcpStream::connect(addr).await.unwrap();
                client
                    .write_all(
                        b"POST /movie.mp4?action=mpu-create HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
                    )
                    .await
                    .unwrap();
                let mut response = Vec::new();
                client.read_to_end(&mut response).await.unwrap();
                let response = String::from_utf8_lossy(&response);
                assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
                assert!(response.contains("\"key\":\"movie.mp4\""), "got: {response}");

                signals.request_shutdown();
                tokio::time::timeout(Duration::from_secs(5), server)
                    .await
                    .expect("server should stop")
                    .unwrap()
                    .unwrap();
                assert!(TcpStream::connect(addr).await.is_err());
            })
            .await;
    }
}
