//! Onion service round trip against a live Tor daemon.
//!
//! Needs Tor with ControlPort 9051 and SocksPort 9050 (or the
//! `PARLEY_*` overrides). Run with `cargo test -- --ignored`.

mod common;

use common::{alice_rsa, bob_rsa, public_of};
use parley_core::crypto::KeyType;
use parley_core::tor::OnionAddress;
use parley_core::{Server, ServerConfig};
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[tokio::test]
#[ignore = "requires a running Tor daemon"]
async fn test_onion_handshake_and_message() {
    println!("\n=== ONION HANDSHAKE TEST ===\n");

    println!("[1/4] Starting two onion services...");
    let config = ServerConfig::from_env().expect("config");
    let alice_server = timeout(Duration::from_secs(180), Server::start(&config))
        .await
        .expect("Timeout starting alice")
        .expect("Failed to start alice");
    let bob_server = timeout(Duration::from_secs(180), Server::start(&config))
        .await
        .expect("Timeout starting bob")
        .expect("Failed to start bob");

    assert!(OnionAddress::from_string(alice_server.address()).is_ok());
    assert!(OnionAddress::from_string(bob_server.address()).is_ok());

    println!("[2/4] Waiting 30s for descriptors to propagate...");
    sleep(Duration::from_secs(30)).await;

    let alice = alice_server.handler();
    let bob = bob_server.handler();

    println!("[3/4] Handshake...");
    let invite = alice
        .generate_conversation(alice_rsa(), public_of(&bob_rsa()), KeyType::Rsa, "bob")
        .await
        .expect("generate");
    let id = bob
        .bootstrap_conversation(&invite.token, bob_rsa(), public_of(&alice_rsa()), "alice")
        .await
        .expect("bootstrap over tor");
    assert!(alice.conversation(&id).await.expect("alice side").is_established());

    println!("[4/4] Message...");
    alice.send_text(&id, "hi over tor").await.expect("send over tor");
    let b = bob.conversation(&id).await.expect("bob side");
    assert_eq!(b.messages()[0].text, "hi over tor");

    alice_server.shutdown().await.expect("shutdown");
    bob_server.shutdown().await.expect("shutdown");
    println!("\n=== PASSED ===\n");
}
