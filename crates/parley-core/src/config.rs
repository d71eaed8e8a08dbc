//! Transport configuration.
//!
//! Every struct has a `Default` matching a stock local Tor daemon. `from_env`
//! applies overrides from:
//!
//! | Variable              | Field                          |
//! |-----------------------|--------------------------------|
//! | `PARLEY_SOCKS_ADDR`   | [`TorConfig::socks_addr`]      |
//! | `PARLEY_CONTROL_ADDR` | [`TorConfig::control_addr`]    |
//! | `PARLEY_LOCAL_PORT`   | [`OnionServiceConfig::local_port`] |

use crate::error::{Error, Result};
use crate::tor::{
    CIRCUIT_TIMEOUT_SECS, DEFAULT_CONTROL_PORT, DEFAULT_SOCKS_PORT, ONION_VIRTUAL_PORT,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable overriding the SOCKS proxy address.
pub const ENV_SOCKS_ADDR: &str = "PARLEY_SOCKS_ADDR";

/// Environment variable overriding the ControlPort address.
pub const ENV_CONTROL_ADDR: &str = "PARLEY_CONTROL_ADDR";

/// Environment variable overriding the local listener port.
pub const ENV_LOCAL_PORT: &str = "PARLEY_LOCAL_PORT";

/// Maximum accepted request body (1 MiB).
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Outbound send timeout (seconds).
pub const SEND_TIMEOUT_SECS: u64 = 120;

/// Where the local Tor daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorConfig {
    /// SOCKS5 proxy for outbound requests.
    pub socks_addr: SocketAddr,
    /// ControlPort for onion service registration.
    pub control_addr: SocketAddr,
    /// Bound on waiting for circuits and for onion registration.
    pub setup_timeout: Duration,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SOCKS_PORT)),
            control_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_CONTROL_PORT)),
            setup_timeout: Duration::from_secs(CIRCUIT_TIMEOUT_SECS),
        }
    }
}

/// The onion service fronting the local listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionServiceConfig {
    /// Local port to listen on; 0 picks an ephemeral port.
    pub local_port: u16,
    /// Port exposed on the onion address.
    pub virtual_port: u16,
}

impl Default for OnionServiceConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            virtual_port: ONION_VIRTUAL_PORT,
        }
    }
}

/// Everything needed to start a [`crate::server::Server`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerConfig {
    /// Tor daemon endpoints.
    pub tor: TorConfig,
    /// Onion service settings.
    pub onion: OnionServiceConfig,
    /// Outbound HTTP settings.
    pub http: HttpConfig,
}

/// Outbound and inbound HTTP limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Bound on a single outbound POST.
    pub send_timeout: Duration,
    /// Maximum inbound request body.
    pub body_limit: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(SEND_TIMEOUT_SECS),
            body_limit: MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_SOCKS_ADDR) {
            config.tor.socks_addr = parse_socket_addr(ENV_SOCKS_ADDR, &value)?;
        }
        if let Some(value) = lookup(ENV_CONTROL_ADDR) {
            config.tor.control_addr = parse_socket_addr(ENV_CONTROL_ADDR, &value)?;
        }
        if let Some(value) = lookup(ENV_LOCAL_PORT) {
            config.onion.local_port = value
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} is not a port: {:?}", ENV_LOCAL_PORT, value)))?;
        }

        Ok(config)
    }
}

fn parse_socket_addr(name: &str, value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} is not host:port: {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.tor.socks_addr.port(), 9050);
        assert_eq!(config.tor.control_addr.port(), 9051);
        assert_eq!(config.tor.setup_timeout, Duration::from_secs(120));
        assert_eq!(config.onion.virtual_port, 80);
        assert_eq!(config.http.send_timeout, Duration::from_secs(120));
        assert_eq!(config.http.body_limit, 1024 * 1024);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SOCKS_ADDR, "127.0.0.1:9150"),
            (ENV_CONTROL_ADDR, "10.0.0.2:9151"),
            (ENV_LOCAL_PORT, " 8080 "),
        ]
        .into_iter()
        .collect();

        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).expect("config");
        assert_eq!(config.tor.socks_addr, "127.0.0.1:9150".parse().expect("addr"));
        assert_eq!(config.tor.control_addr, "10.0.0.2:9151".parse().expect("addr"));
        assert_eq!(config.onion.local_port, 8080);
    }

    #[test]
    fn test_bad_env_rejected() {
        let bad_port = ServerConfig::from_lookup(|k| (k == ENV_LOCAL_PORT).then(|| "eighty".into()));
        assert!(matches!(bad_port, Err(Error::Config(_))));

        let bad_addr = ServerConfig::from_lookup(|k| (k == ENV_SOCKS_ADDR).then(|| "localhost".into()));
        assert!(matches!(bad_addr, Err(Error::Config(_))));
    }
}
