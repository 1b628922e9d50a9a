//! Pluggable bearer-token validation for the `/_lobber/connect` handshake.
//!
//! Real token issuance, storage, and revocation belong to the product's
//! account and billing surface, not here. What stays in scope is the seam:
//! the handshake asks a `TokenValidator` whether a bearer token may claim a
//! hostname, and never cares how the answer was produced.

use std::sync::Arc;

pub trait TokenValidator: Send + Sync {
    /// `Some(user identity)` if `token` is allowed to claim `hostname`,
    /// `None` if invalid. Implementations may treat hostname scoping as a
    /// no-op and accept any valid token for any hostname.
    fn validate(&self, token: &str, hostname: &str) -> Option<String>;
}

/// Accepts any non-empty token and labels the user `"anonymous"`. This is
/// the relay binary's default and the only implementation shipped here — a
/// real validator (real identities, revocation, per-user quotas) is a
/// substitution point, not a feature of the core.
pub struct PermissiveValidator;

impl TokenValidator for PermissiveValidator {
    fn validate(&self, token: &str, _hostname: &str) -> Option<String> {
        if token.is_empty() {
            None
        } else {
            Some("anonymous".to_string())
        }
    }
}

pub fn default_validator() -> Arc<dyn TokenValidator> {
    Arc::new(PermissiveValidator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_validator_rejects_only_empty_tokens() {
        let validator = PermissiveValidator;
        assert_eq!(validator.validate("anything", "a.example.com").as_deref(), Some("anonymous"));
        assert_eq!(validator.validate("", "a.example.com"), None);
    }
}
