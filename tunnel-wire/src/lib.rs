//! # Tunnel Wire Protocol
//!
//! Length-prefixed binary framing shared by the relay and the tunnel
//! agent. A frame is `tag(1) ++ len(4, big-endian) ++ payload(len)`, where
//! `payload` is a JSON document (empty for `Ready`). The codec is stateless
//! and symmetric: both sides call the same encode/decode functions.
//!
//! Three variants only — `Ready`, `Request`, `Response` — no schema
//! negotiation, matching the wire format described for the relay.

mod frame;
mod headers;
mod io;

pub use frame::{Frame, RequestFrame, ResponseFrame};
pub use headers::HeaderMap;
pub use io::{read_ready, read_request, read_response, write_frame, FrameError};
