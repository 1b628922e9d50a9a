//! Reference implementation of the remote-agent side of the tunnel wire
//! protocol. Exists to make the relay testable against a real second
//! process; carries none of the product's GUI, QUIC transport, or
//! certificate bundling.

pub mod client;
pub mod config;
