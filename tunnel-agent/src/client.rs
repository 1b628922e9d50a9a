//! The agent's connection loop: handshake, `Ready`, then forward every
//! `Request` frame to the configured local origin and write back a
//! `Response` frame. Reconnects with a fixed delay on any failure,
//! mirroring the reconnect-with-backoff shape of a long-lived desktop
//! agent's connection loop, minus the backoff curve and the GUI state it
//! feeds.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tunnel_wire::{Frame, HeaderMap, RequestFrame, ResponseFrame};

use crate::config::AgentConfig;

const MAX_HEAD_BYTES: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed during handshake")]
    ConnectionClosed,

    #[error("relay rejected handshake with status {0}")]
    HandshakeRejected(u16),

    #[error("malformed handshake response")]
    MalformedHandshake,

    #[error("wire protocol error: {0}")]
    Wire(#[from] tunnel_wire::FrameError),
}

/// Connects, runs the handshake, and forwards requests until the
/// connection fails, then sleeps `reconnect_delay` and tries again. Never
/// returns.
pub async fn run(config: AgentConfig) {
    let http = reqwest::Client::new();
    loop {
        tracing::info!(relay = %config.relay_addr, domain = %config.domain, "connecting to relay");
        if let Err(err) = connect_once(&config, &http).await {
            tracing::warn!(error = %err, "tunnel connection ended, reconnecting");
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn connect_once(config: &AgentConfig, http: &reqwest::Client) -> Result<(), AgentError> {
    let mut stream = TcpStream::connect(&config.relay_addr).await?;
    send_handshake(&mut stream, config).await?;
    read_response_head(&mut stream).await?;

    tunnel_wire::write_frame(&mut stream, &Frame::Ready).await?;
    tracing::info!(domain = %config.domain, "tunnel ready");

    loop {
        let request = tunnel_wire::read_request(&mut stream).await?;
        let response = forward(http, config, request).await;
        tunnel_wire::write_frame(&mut stream, &Frame::Response(response)).await?;
    }
}

async fn send_handshake(stream: &mut TcpStream, config: &AgentConfig) -> Result<(), AgentError> {
    let request = format!(
        "POST /_lobber/connect HTTP/1.1\r\n\
         Host: {host}\r\n\
         X-Lobber-Domain: {domain}\r\n\
         Authorization: Bearer {token}\r\n\
         Content-Length: 0\r\n\r\n",
        host = config.relay_addr,
        domain = config.domain,
        token = config.token,
    );
    stream.write_all(request.as_bytes()).await?;
    Ok(())
}

async fn read_response_head(stream: &mut TcpStream) -> Result<(), AgentError> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(AgentError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_HEAD_BYTES {
            return Err(AgentError::MalformedHandshake);
        }

        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                return match response.code {
                    Some(200) => Ok(()),
                    Some(code) => Err(AgentError::HandshakeRejected(code)),
                    None => Err(AgentError::MalformedHandshake),
                };
            }
            Ok(httparse::Status::Partial) => continue,
            Err(_) => return Err(AgentError::MalformedHandshake),
        }
    }
}

async fn forward(http: &reqwest::Client, config: &AgentConfig, request: RequestFrame) -> ResponseFrame {
    let url = format!("{}{}", config.local_origin, request.path);
    let method = reqwest::Method::from_bytes(request.method.as_bytes()).unwrap_or(reqwest::Method::GET);

    let mut builder = http.request(method, &url);
    for (name, values) in request.headers.iter() {
        for value in values {
            builder = builder.header(name, value);
        }
    }
    builder = builder.body(request.body);

    match builder.send().await {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let mut headers = HeaderMap::new();
            for (name, value) in response.headers().iter() {
                if let Ok(value) = value.to_str() {
                    headers.append(name.as_str(), value);
                }
            }
            let body = response.bytes().await.map(|bytes| bytes.to_vec()).unwrap_or_default();
            ResponseFrame {
                id: request.id,
                status_code,
                headers,
                body,
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, url = %url, "local origin unreachable");
            ResponseFrame::synthetic(request.id, 502, "local origin unreachable")
        }
    }
}
