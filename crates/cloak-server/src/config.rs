//! Server configuration loaded from environment variables.
//!
//! The core keys are mandatory and validated here; a missing or malformed key
//! stops the process before it binds a socket.

use std::fmt;
use std::net::SocketAddr;

use cloak_core::{CloakConfig, ConfigError};
use cloak_shared::constants::DEFAULT_HTTP_PORT;

#[derive(Clone)]
pub struct ServerConfig {
    pub core: CloakConfig,

    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Shared secret the upstream gateway sends in `x-gateway-token`. Caller
    /// headers without it are rejected.
    /// Env: `CLOAK_GATEWAY_TOKEN`
    /// Default: unset (caller API disabled, only `/health` answers).
    pub gateway_token: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let core = CloakConfig::from_lookup(&lookup)?;

        let mut http_addr: SocketAddr = ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into();
        if let Some(val) = lookup("HTTP_ADDR") {
            match val.parse() {
                Ok(addr) => http_addr = addr,
                Err(_) => tracing::warn!(value = %val, "Invalid HTTP_ADDR, using default"),
            }
        }

        let gateway_token = lookup("CLOAK_GATEWAY_TOKEN").filter(|t| !t.is_empty());

        Ok(Self {
            core,
            http_addr,
            gateway_token,
        })
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("core", &self.core)
            .field("http_addr", &self.http_addr)
            .field("gateway_token", &self.gateway_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_fatal_keys() {
        let lookup = |name: &str| match name {
            "CLOAK_IDENTITY_KEY" => Some("11".repeat(32)),
            "CLOAK_VAULT_KEY" => Some("22".repeat(32)),
            "HTTP_ADDR" => Some("not an addr".to_string()),
            _ => None,
        };
        let config = ServerConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.http_addr.port(), 8080);
        assert!(config.gateway_token.is_none());

        let with_token = ServerConfig::from_lookup(|name| match name {
            "CLOAK_GATEWAY_TOKEN" => Some("gw-secret".to_string()),
            other => lookup(other),
        })
        .unwrap();
        assert_eq!(with_token.gateway_token.as_deref(), Some("gw-secret"));
        assert!(!format!("{with_token:?}").contains("gw-secret"));

        let missing = ServerConfig::from_lookup(|_| None);
        assert!(matches!(missing, Err(ConfigError::MissingKey(_))));
    }
}
