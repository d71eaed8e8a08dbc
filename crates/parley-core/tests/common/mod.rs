//! Shared fixtures for integration tests.

#![allow(dead_code)]

use parley_core::config::HttpConfig;
use parley_core::crypto::{generate_pgp, generate_rsa, KeyPair, MIN_RSA_BITS};
use parley_core::Server;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

macro_rules! cached_keys {
    ($name:ident, $make:expr) => {
        pub fn $name() -> Arc<KeyPair> {
            static KEYS: OnceLock<Arc<KeyPair>> = OnceLock::new();
            KEYS.get_or_init(|| Arc::new($make.expect("key generation")))
                .clone()
        }
    };
}

cached_keys!(alice_rsa, generate_rsa(MIN_RSA_BITS));
cached_keys!(bob_rsa, generate_rsa(MIN_RSA_BITS));
cached_keys!(alice_pgp, generate_pgp("alice"));
cached_keys!(bob_pgp, generate_pgp("bob"));

/// A server on an ephemeral loopback port, no Tor.
pub async fn local_server() -> Server {
    let config = HttpConfig {
        send_timeout: Duration::from_secs(10),
        ..HttpConfig::default()
    };
    Server::bind_direct("127.0.0.1:0".parse().expect("addr"), &config)
        .await
        .expect("bind")
}

/// Peer's public half, shared.
pub fn public_of(keys: &KeyPair) -> Arc<parley_core::PublicKey> {
    Arc::new(keys.public_key().clone())
}
