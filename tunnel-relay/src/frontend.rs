//! The accept loop and its one branching decision: does this connection
//! open a tunnel, or is it an ordinary HTTP request to proxy?
//!
//! Neither branch relies on a framework's own upgrade machinery. The
//! connect handshake replies `200 OK`, not `101 Switching Protocols`, so
//! `hyper`'s `Connection: Upgrade` handling would never fire for it — and
//! by the time a framework server loop has accepted a connection it is
//! usually too late to hand the raw socket back out. Instead every
//! accepted `TcpStream` is peeked (never consumed) for its first bytes; a
//! `POST /_lobber/connect` request line routes straight to
//! [`crate::handshake::handle`] with the untouched stream, and everything
//! else is served through a one-off `hyper` HTTP/1 connection wrapping the
//! `axum` router.

use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};

use crate::handshake;
use crate::handlers;
use crate::state::AppState;

const SNIFF_LEN: usize = 32;
const CONNECT_PREFIX: &[u8] = b"POST /_lobber/connect";

/// Binds `state.config.listen_addr` and serves forever, spawning one task
/// per accepted connection.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(state.config.listen_addr).await?;
    serve_on(listener, state).await
}

/// Serves forever on an already-bound listener. Split out of [`serve`] so
/// tests can bind an ephemeral port, read back its address, and still
/// drive the exact same accept loop.
pub async fn serve_on(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr(), "tunnel relay listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = dispatch(stream, state).await {
                tracing::warn!(peer = %peer, error = %err, "connection handling failed");
            }
        });
    }
}

async fn dispatch(stream: TcpStream, state: AppState) -> std::io::Result<()> {
    let mut sniff = [0u8; SNIFF_LEN];
    let n = stream.peek(&mut sniff).await?;

    if sniff[..n].starts_with(CONNECT_PREFIX) {
        handshake::handle(stream, state).await;
        return Ok(());
    }

    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(handlers::router(state));
    if let Err(err) = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await {
        tracing::debug!(error = %err, "http/1 connection ended");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_prefix_matches_the_handshake_request_line() {
        let head = b"POST /_lobber/connect HTTP/1.1\r\n";
        assert!(head.starts_with(CONNECT_PREFIX));
    }

    #[test]
    fn ordinary_requests_do_not_match_the_connect_prefix() {
        let head = b"GET /health HTTP/1.1\r\n";
        assert!(!head.starts_with(CONNECT_PREFIX));
    }
}
