//! Tor integration for Parley.
//!
//! Inbound traffic arrives through an ephemeral v3 onion service registered
//! over the ControlPort; outbound requests go through Tor's SOCKS5 proxy with
//! remote name resolution. There is no clearnet fallback in onion mode.

mod controller;
mod onion;
mod service;

pub use controller::{ProtocolInfo, TorAuth, TorController};
pub use onion::OnionAddress;
pub use service::OnionService;

use crate::config::TorConfig;
use crate::error::{Error, Result};
use std::time::Duration;

/// Default SOCKS5 proxy port for Tor.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Default control port for Tor.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Port exposed on the onion address.
pub const ONION_VIRTUAL_PORT: u16 = 80;

/// Bound on waiting for Tor circuits and onion registration (seconds).
pub const CIRCUIT_TIMEOUT_SECS: u64 = 120;

/// Build an HTTP client that routes every request through Tor.
///
/// `socks5h` leaves `.onion` resolution to Tor. Random SOCKS credentials
/// give this client its own circuit (`IsolateSOCKSAuth`).
pub fn proxied_client(config: &TorConfig, send_timeout: Duration) -> Result<reqwest::Client> {
    let proxy = reqwest::Proxy::all(format!("socks5h://{}", config.socks_addr))
        .map_err(|e| Error::Tor(format!("invalid SOCKS proxy: {}", e)))?
        .basic_auth(&crate::crypto::random_token(16), &crate::crypto::random_token(16));

    reqwest::Client::builder()
        .proxy(proxy)
        .timeout(send_timeout)
        .build()
        .map_err(|e| Error::Tor(format!("failed to build client: {}", e)))
}

/// Build an HTTP client for direct connections (local testing only).
pub fn direct_client(send_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(send_timeout)
        .build()
        .map_err(|e| Error::Io(format!("failed to build client: {}", e)))
}
