//! Shared application state handed to every axum handler via `State`.

use std::sync::Arc;

use crate::config::Config;
use crate::registry::TunnelRegistry;
use crate::token::TokenValidator;

#[derive(Clone)]
pub struct AppState {
    pub registry: TunnelRegistry,
    pub config: Arc<Config>,
    pub token_validator: Arc<dyn TokenValidator>,
}

impl AppState {
    pub fn new(config: Config, token_validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            registry: TunnelRegistry::new(),
            config: Arc::new(config),
            token_validator,
        }
    }
}
