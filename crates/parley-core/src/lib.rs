//! # Parley Core Library
//!
//! Two-party encrypted conversations between peers that are reachable only
//! through Tor onion services.
//!
//! ## Protocol
//!
//! 1. The initiator generates a conversation and hands the resulting token
//!    to the peer out of band.
//! 2. The responder bootstraps from the token and POSTs an acknowledgement
//!    to the initiator's `/bootstrap`.
//! 3. Both sides exchange `/message` envelopes, each bound to the session by
//!    the receiver's token and signed by the sender.
//!
//! Keys are either RSA-4096 (detached signatures) or OpenPGP (embedded
//! signatures); both sit behind one encrypt-and-sign contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        server (axum) + tor              │
//! ├─────────────────────────────────────────┤
//! │         registry (RouteHandler)         │
//! ├─────────────────────────────────────────┤
//! │     handshake     │    conversation     │
//! ├─────────────────────────────────────────┤
//! │      envelope     │       crypto        │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod conversation;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod registry;
pub mod server;
pub mod tor;

pub use config::ServerConfig;
pub use conversation::{Conversation, ConversationEvent, ConversationState, Message};
pub use crypto::{KeyPair, KeyType, PrivateKey, PublicKey};
pub use error::{Error, Result};
pub use registry::{Invitation, RouteHandler};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Key pairs shared across unit tests. RSA-4096 generation is slow, so each
/// pair is made once per test binary.
#[cfg(test)]
pub(crate) mod test_support {
    #![allow(clippy::expect_used)]

    use crate::crypto::{generate_pgp, generate_rsa, KeyPair, MIN_RSA_BITS};
    use std::sync::{Arc, OnceLock};

    macro_rules! cached_keys {
        ($name:ident, $make:expr) => {
            pub(crate) fn $name() -> Arc<KeyPair> {
                static KEYS: OnceLock<Arc<KeyPair>> = OnceLock::new();
                KEYS.get_or_init(|| Arc::new($make.expect("key generation")))
                    .clone()
            }
        };
    }

    cached_keys!(alice_rsa, generate_rsa(MIN_RSA_BITS));
    cached_keys!(bob_rsa, generate_rsa(MIN_RSA_BITS));
    cached_keys!(carol_rsa, generate_rsa(MIN_RSA_BITS));
    cached_keys!(alice_pgp, generate_pgp("alice"));
    cached_keys!(bob_pgp, generate_pgp("bob"));
}
