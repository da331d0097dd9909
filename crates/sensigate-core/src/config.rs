//! Gateway configuration
//!
//! Loaded from TOML at startup, falls back to defaults if no config file
//! exists or it cannot be parsed.

use crate::types::IdentityKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Namespace under which peers see this gateway's providers.
    pub namespace: String,
    pub server: ServerConfig,
    pub peer: PeerConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: BindMode,
}

/// Bind mode for the peer listener
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Loopback,
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

impl std::str::FromStr for BindMode {
    type Err = crate::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "loopback" => Ok(BindMode::Loopback),
            "lan" => Ok(BindMode::Lan),
            _ => Err(crate::Error::Config(format!("unknown bind mode: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Shared token peers must present. `None` disables peer authentication.
    pub token: Option<String>,
    /// Upper bound on a relayed call before it resolves to BackendUnavailable.
    pub relay_timeout_ms: u64,
    /// Peer gateways to dial at startup (`ws://host:port/peer`).
    pub peers: Vec<String>,
}

/// Allow/deny glob lists over `METHOD:/provider/service/resource` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTier {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// A bootstrap account created in the identity store at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub policy: PolicyTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub anonymous: PolicyTier,
    pub authenticated: PolicyTier,
    pub application: PolicyTier,
    pub accounts: Vec<AccountConfig>,
}

impl SecurityConfig {
    pub fn tier(&self, kind: IdentityKind) -> &PolicyTier {
        match kind {
            IdentityKind::Anonymous => &self.anonymous,
            IdentityKind::Authenticated => &self.authenticated,
            IdentityKind::Application => &self.application,
        }
    }
}

// ============================================================
// Defaults
// ============================================================

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            server: ServerConfig::default(),
            peer: PeerConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// `sna` followed by a short random suffix.
pub fn default_namespace() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("sna{}", &id[..6])
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 18790, bind: BindMode::Loopback }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self { token: None, relay_timeout_ms: 5_000, peers: Vec::new() }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let everything = |methods: &[&str]| PolicyTier {
            allow: methods.iter().map(|m| format!("{}:/**", m)).collect(),
            deny: Vec::new(),
        };
        Self {
            anonymous: everything(&["READ", "SUBSCRIBE", "UNSUBSCRIBE"]),
            authenticated: everything(&["*"]),
            application: everything(&["*"]),
            accounts: Vec::new(),
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl GatewayConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind.to_addr(), self.server.port)
    }
}
