//! Error taxonomy for everything the public handler can reject before a
//! tunneled response is even possible.
//!
//! Categories 1–5 (protocol violation, transport failure, backpressure,
//! queue timeout, response timeout) never escape [`crate::session`] as Rust
//! errors — they're absorbed and surface as synthetic
//! [`tunnel_wire::ResponseFrame`]s on the waiter's result slot, which the
//! handler copies into an HTTP response exactly like a real one. Only
//! categories 6 (unknown host) and 7 (handshake rejection) are represented
//! here, since those happen before any session exists or without one.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Category 7 — handshake rejection. Produced before any session exists.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("missing X-Lobber-Domain header")]
    MissingDomain,

    #[error("missing or malformed Authorization header")]
    MissingToken,

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("connection hijack not supported")]
    HijackUnsupported,
}

impl HandshakeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandshakeError::MissingDomain => StatusCode::BAD_REQUEST,
            HandshakeError::MissingToken | HandshakeError::InvalidToken => StatusCode::UNAUTHORIZED,
            HandshakeError::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Category 6 — no session registered for the requested hostname.
#[derive(Debug, thiserror::Error)]
#[error("tunnel not found")]
pub struct UnknownHostError;

impl IntoResponse for UnknownHostError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_GATEWAY, "tunnel not found").into_response()
    }
}
