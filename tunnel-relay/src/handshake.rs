//! The `/_lobber/connect` handshake: validate, hijack, register, wait for
//! `Ready`.
//!
//! By the time [`handle`] is called, [`crate::frontend`] has already peeked
//! the connection and decided — without consuming a single byte — that it
//! looks like a connect request. Everything here reads and writes the raw
//! `TcpStream` directly; no HTTP framework is involved until the 200 OK
//! line is on the wire and the socket has been handed to
//! [`crate::session::TunnelSession`].

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::HandshakeError;
use crate::session::{OnClose, TunnelSession};
use crate::state::AppState;

const MAX_HEAD_BYTES: usize = 8 * 1024;
const CONNECT_OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n";

/// Drives one connect attempt end to end: negotiate, commit, register,
/// wait for `Ready`, then run the reader loop for the rest of the
/// session's life. Never returns an error — by the commit point a failure
/// means "close the session", not "reject the handshake", and both paths
/// are handled internally.
pub async fn handle(mut stream: TcpStream, state: AppState) {
    let (hostname, user) = match negotiate(&mut stream, &state).await {
        Ok(claim) => claim,
        Err(err) => {
            tracing::warn!(error = %err, "handshake rejected");
            let _ = write_error(&mut stream, &err).await;
            return;
        }
    };

    if let Err(err) = stream.write_all(CONNECT_OK_RESPONSE).await {
        tracing::warn!(error = %err, "failed writing handshake response");
        return;
    }

    let (mut read_half, write_half) = stream.into_split();

    let registry = state.registry.clone();
    let on_close: OnClose = Box::new(move |id, host| registry.unregister_if(host, id));
    let session = TunnelSession::spawn(
        hostname.clone(),
        user.clone(),
        state.config.max_pending_queue,
        state.config.pending_queue_ttl,
        write_half,
        on_close,
    );
    state.registry.register(Arc::clone(&session));
    tracing::info!(hostname = %hostname, user = %user, session = %session.id(), "tunnel connected");

    match tunnel_wire::read_ready(&mut read_half).await {
        Ok(()) => {
            session.mark_ready();
            tracing::info!(hostname = %hostname, session = %session.id(), "tunnel ready");
        }
        Err(err) => {
            tracing::warn!(hostname = %hostname, error = %err, "agent never sent ready frame");
            session.close();
            return;
        }
    }

    session.run_reader(read_half).await;
}

/// Reads and validates the connect request's headers. Returns the claimed
/// hostname and bearer token on success. Consumes exactly the request
/// head's bytes off `stream` — nothing more.
async fn negotiate(stream: &mut TcpStream, state: &AppState) -> Result<(String, String), HandshakeError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];

    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|_| HandshakeError::HijackUnsupported)?;
        if n == 0 {
            return Err(HandshakeError::HijackUnsupported);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_HEAD_BYTES {
            return Err(HandshakeError::HijackUnsupported);
        }

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let hostname = find_header(&req, "x-lobber-domain").ok_or(HandshakeError::MissingDomain)?;
                let token = find_header(&req, "authorization")
                    .and_then(|value| value.strip_prefix("Bearer ").map(str::to_string))
                    .ok_or(HandshakeError::MissingToken)?;
                let user = state
                    .token_validator
                    .validate(&token, &hostname)
                    .ok_or(HandshakeError::InvalidToken)?;
                return Ok((hostname, user));
            }
            Ok(httparse::Status::Partial) => continue,
            Err(_) => return Err(HandshakeError::HijackUnsupported),
        }
    }
}

fn find_header(req: &httparse::Request, name: &str) -> Option<String> {
    req.headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .and_then(|header| std::str::from_utf8(header.value).ok())
        .map(str::to_string)
}

async fn write_error(stream: &mut TcpStream, err: &HandshakeError) -> std::io::Result<()> {
    let status = err.status_code();
    let body = err.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::token::{default_validator, TokenValidator};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    struct RejectAll;
    impl TokenValidator for RejectAll {
        fn validate(&self, _token: &str, _hostname: &str) -> Option<String> {
            None
        }
    }

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn negotiate_accepts_a_well_formed_request() {
        let (server, mut client) = loopback_pair().await;
        let state = AppState::new(Config::from_env(), default_validator());

        client
            .write_all(
                b"POST /_lobber/connect HTTP/1.1\r\n\
                  Host: relay.example.com\r\n\
                  X-Lobber-Domain: a.example.com\r\n\
                  Authorization: Bearer secret-token\r\n\
                  Content-Length: 0\r\n\r\n",
            )
            .await
            .unwrap();

        let mut server = server;
        let (hostname, user) = negotiate(&mut server, &state).await.unwrap();
        assert_eq!(hostname, "a.example.com");
        assert_eq!(user, "anonymous");
    }

    #[tokio::test]
    async fn negotiate_rejects_missing_domain_header() {
        let (server, mut client) = loopback_pair().await;
        let state = AppState::new(Config::from_env(), default_validator());

        client
            .write_all(b"POST /_lobber/connect HTTP/1.1\r\nAuthorization: Bearer t\r\n\r\n")
            .await
            .unwrap();

        let mut server = server;
        let err = negotiate(&mut server, &state).await.unwrap_err();
        assert!(matches!(err, HandshakeError::MissingDomain));
    }

    #[tokio::test]
    async fn negotiate_rejects_tokens_the_validator_refuses() {
        let (server, mut client) = loopback_pair().await;
        let state = AppState::new(Config::from_env(), Arc::new(RejectAll));

        client
            .write_all(
                b"POST /_lobber/connect HTTP/1.1\r\nX-Lobber-Domain: a.example.com\r\nAuthorization: Bearer t\r\n\r\n",
            )
            .await
            .unwrap();

        let mut server = server;
        let err = negotiate(&mut server, &state).await.unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidToken));
    }
}
