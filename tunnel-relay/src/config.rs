//! Process-wide configuration, immutable after startup.
//!
//! Recognized environment variables (all optional, all defaulted):
//!
//! - `MAX_PENDING_QUEUE` — requests (default `100`)
//! - `PENDING_QUEUE_TTL_SECS` — seconds (default `5`)
//! - `BASE_DOMAIN` — the relay's own marketing host, distinct from tunnel
//!   hosts (default unset)
//! - `LISTEN_ADDR` — socket address the relay binds (default
//!   `0.0.0.0:7070`)
//!
//! Billing/auth credentials the core does not itself use are deliberately
//! not modeled here — that surface belongs to the out-of-scope collaborators
//! named in the top-level design notes.

use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_MAX_PENDING_QUEUE: usize = 100;
const DEFAULT_PENDING_QUEUE_TTL_SECS: u64 = 5;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7070";

/// Margin added on top of `pending_queue_ttl` to get the handler's
/// response-wait deadline.
pub const RESPONSE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
    pub max_pending_queue: usize,
    pub pending_queue_ttl: Duration,
    pub base_domain: Option<String>,
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Reads configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let max_pending_queue = env_parsed("MAX_PENDING_QUEUE", DEFAULT_MAX_PENDING_QUEUE);
        let pending_queue_ttl = Duration::from_secs(env_parsed(
            "PENDING_QUEUE_TTL_SECS",
            DEFAULT_PENDING_QUEUE_TTL_SECS,
        ));
        let base_domain = std::env::var("BASE_DOMAIN").ok().filter(|s| !s.is_empty());
        let listen_addr = std::env::var("LISTEN_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.parse().expect("valid default listen addr"));

        Self {
            max_pending_queue,
            pending_queue_ttl,
            base_domain,
            listen_addr,
        }
    }

    /// The handler's per-request response-wait deadline.
    pub fn response_timeout(&self) -> Duration {
        self.pending_queue_ttl + RESPONSE_TIMEOUT_MARGIN
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        // Assumes no other test in this process touches these keys.
        for key in ["MAX_PENDING_QUEUE", "PENDING_QUEUE_TTL_SECS", "BASE_DOMAIN", "LISTEN_ADDR"] {
            std::env::remove_var(key);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.max_pending_queue, 100);
        assert_eq!(cfg.pending_queue_ttl, Duration::from_secs(5));
        assert_eq!(cfg.base_domain, None);
        assert_eq!(cfg.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
    }
}
