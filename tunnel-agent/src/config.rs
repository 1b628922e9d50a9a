//! Agent configuration, read from the environment the same way the
//! relay's own [`tunnel_relay::config`] does.

use std::time::Duration;

const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:7070";
const DEFAULT_LOCAL_ORIGIN: &str = "http://127.0.0.1:8000";
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 3;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Host:port of the relay's `/_lobber/connect` endpoint.
    pub relay_addr: String,
    /// Hostname this agent claims, sent as `X-Lobber-Domain`.
    pub domain: String,
    /// Bearer token sent as `Authorization`.
    pub token: String,
    /// Local HTTP origin every tunneled request is replayed against.
    pub local_origin: String,
    pub reconnect_delay: Duration,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let relay_addr = std::env::var("RELAY_ADDR").unwrap_or_else(|_| DEFAULT_RELAY_ADDR.to_string());
        let domain = std::env::var("TUNNEL_DOMAIN").map_err(|_| anyhow::anyhow!("TUNNEL_DOMAIN must be set"))?;
        let token = std::env::var("TUNNEL_TOKEN").map_err(|_| anyhow::anyhow!("TUNNEL_TOKEN must be set"))?;
        let local_origin = std::env::var("LOCAL_ORIGIN").unwrap_or_else(|_| DEFAULT_LOCAL_ORIGIN.to_string());
        let reconnect_delay = Duration::from_secs(
            std::env::var("RECONNECT_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
        );

        Ok(Self {
            relay_addr,
            domain,
            token,
            local_origin,
            reconnect_delay,
        })
    }
}
