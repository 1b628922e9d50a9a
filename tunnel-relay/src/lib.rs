//! Reverse tunnel relay: accepts tunnel-client connections, registers them
//! by hostname, and forwards public HTTP traffic to whichever session
//! claims the request's `Host`.

pub mod config;
pub mod error;
pub mod frontend;
pub mod handlers;
pub mod handshake;
pub mod registry;
pub mod session;
pub mod state;
pub mod token;

use config::Config;
use state::AppState;
use token::default_validator;

/// Loads configuration from the environment and serves forever. Split out
/// of `main` so integration tests can build an `AppState` the same way the
/// binary does.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env();
    let state = AppState::new(config, default_validator());
    frontend::serve(state).await?;
    Ok(())
}
