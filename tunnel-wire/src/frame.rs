//! The three frame payloads and their JSON shapes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::headers::HeaderMap;

/// A tunneled HTTP request, carried from the relay to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    /// Path plus query string, e.g. `/api/test?x=1`.
    pub path: String,
    pub headers: HeaderMap,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
}

/// A tunneled HTTP response, carried from the agent back to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub status_code: u16,
    pub headers: HeaderMap,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
}

/// A tunnel protocol message: `Ready`, `Request`, or `Response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sent once by the agent after the handshake, before any `Response`.
    Ready,
    Request(RequestFrame),
    Response(ResponseFrame),
}

impl Frame {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Frame::Ready => 0x00,
            Frame::Request(_) => 0x01,
            Frame::Response(_) => 0x02,
        }
    }
}

impl ResponseFrame {
    /// Builds a synthetic response the relay produces locally (never from
    /// the remote agent) to complete a waiter on error. `id` must match the
    /// request it is completing.
    pub fn synthetic(id: impl Into<String>, status_code: u16, message: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.append("content-type", "text/plain; charset=utf-8");
        Self {
            id: id.into(),
            status_code,
            headers,
            body: message.as_bytes().to_vec(),
        }
    }

    /// Same as [`synthetic`](Self::synthetic) but also sets `Retry-After`,
    /// used for the backpressure (queue-full) failure mode.
    pub fn synthetic_with_retry_after(
        id: impl Into<String>,
        status_code: u16,
        message: &str,
        retry_after_secs: u64,
    ) -> Self {
        let mut resp = Self::synthetic(id, status_code, message);
        resp.headers
            .append("retry-after", retry_after_secs.to_string());
        resp
    }
}

/// Base64-encodes opaque body bytes for JSON transport, as the wire schema
/// requires (`"body": base64-bytes`).
mod body_base64 {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        BASE64.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_round_trips_through_json() {
        let mut headers = HeaderMap::new();
        headers.append("x-a", "1");
        headers.append("x-a", "2");
        let req = RequestFrame {
            id: "abc".into(),
            method: "POST".into(),
            path: "/x?y=1".into(),
            headers,
            body: vec![0, 159, 146, 150],
        };
        let json = serde_json::to_vec(&req).unwrap();
        let back: RequestFrame = serde_json::from_slice(&json).unwrap();
        assert_eq!(req, back);
    }
}
