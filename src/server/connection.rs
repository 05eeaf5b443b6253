// Connection handling module
// Accepts a single TCP connection and serves it with the request handler

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::config::AppState;
use crate::handler;
use crate::logger;

/// Accept a connection, enforcing `max_connections` and logging.
///
/// Returns `false` when the connection was rejected.
pub fn accept_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    conn_counter: &Arc<AtomicUsize>,
) -> bool {
    // Increment first, then check, so concurrent accepts cannot overshoot
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection from {peer_addr} rejected."
            ));
            drop(stream);
            return false;
        }
    }

    logger::log_connection_accepted(&peer_addr);
    handle_connection(stream, peer_addr, Arc::clone(state), Arc::clone(conn_counter));
    true
}

/// Serve a connection on the current `LocalSet` until the client goes away.
///
/// No read or write timeout is applied, so long uploads run to completion.
/// The active connection counter is decremented when serving ends.
fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    conn_counter: Arc<AtomicUsize>,
) {
    tokio::task::spawn_local(async move {
        let io = TokioIo::new(stream);

        let mut builder = http1::Builder::new();
        builder.keep_alive(state.config.performance.keep_alive);

        let service_state = Arc::clone(&state);
        let conn = builder.serve_connection(
            io,
            service_fn(move |req| handler::handle_request(req, Arc::clone(&service_state), peer_addr)),
        );

        if let Err(err) = conn.await {
            logger::log_connection_error(&err);
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn state_with_limit(max_connections: Option<u64>) -> Arc<AppState> {
        let mut config = Config::load_from("does-not-exist").unwrap();
        config.performance.max_connections = max_connections;
        Arc::new(AppState::new(&config, Arc::new(MemoryStore::default())))
    }

    async fn connected_pair(listener: &TcpListener) -> (TcpStream, TcpStream, SocketAddr) {
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    #[tokio::test]
    async fn test_rejects_over_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let state = state_with_limit(Some(1));
        let counter = Arc::new(AtomicUsize::new(1));

        let (mut client, server, peer) = connected_pair(&listener).await;
        assert!(!accept_connection(server, peer, &state, &counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // The rejected socket is closed straight away
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_serves_request_and_releases_slot() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let state = state_with_limit(None);
                let counter = Arc::new(AtomicUsize::new(0));

                let (mut client, server, peer) = connected_pair(&listener).await;
                assert!(accept_connection(server, peer, &state, &counter));
                assert_eq!(counter.load(Ordering::SeqCst), 1);

                client
                    .write_all(
                        b"GET /missing?action=get HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
                    )
                    .await
                    .unwrap();
                let mut response = Vec::new();
                client.read_to_end(&mut response).await.unwrap();
                let response = String::from_utf8_lossy(&response);
                assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");
                assert!(response.ends_with("Object Not Found"), "got: {response}");

                for _ in 0..100 {
                    if counter.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                assert_eq!(counter.load(Ordering::SeqCst), 0);
            })
            .await;
    }
}
