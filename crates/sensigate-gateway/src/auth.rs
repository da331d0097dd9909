//! Peer authentication

use ring::constant_time::verify_slices_are_equal;
use sensigate_core::{Error, PeerConfig, Result};

/// Shared token a dialing peer must present. No token configured means
/// every peer is accepted.
#[derive(Clone, Debug, Default)]
pub struct PeerAuth {
    pub token: Option<String>,
}

impl PeerAuth {
    pub fn from_config(config: &PeerConfig, env_token: Option<String>) -> Self {
        Self {
            token: config.token.clone().or(env_token),
        }
    }

    pub fn verify_token(&self, provided: Option<&str>) -> Result<()> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };
        let provided = provided.ok_or(Error::InvalidCredentials)?;
        verify_slices_are_equal(expected.as_bytes(), provided.as_bytes()).map_err(|_| Error::InvalidCredentials)
    }

    /// Extract the token of an `Authorization: Bearer <token>` header value.
    pub fn bearer(header: Option<&str>) -> Option<&str> {
        header.and_then(|h| h.strip_prefix("Bearer ")).map(str::trim)
    }
}
