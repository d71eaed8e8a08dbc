//! Handshake: one round trip that exchanges session tokens and addresses.
//!
//! ```text
//! initiator                                  responder
//!    | generate_conversation                     |
//!    |--- token (out of band) ------------------>|
//!    |                        bootstrap_conversation
//!    |<-- POST /bootstrap (acknowledgement) -----|
//! accept_acknowledgement                         |
//! ```
//!
//! Both wrappers carry an encrypted, signed [`StartConversation`]. The
//! acknowledgement reuses the initiator's conversation ID so both sides key
//! the session identically.
//!
//! These functions touch no shared state; registration is up to the caller.

use crate::conversation::Conversation;
use crate::crypto::{self, KeyPair, KeyType, PublicKey};
use crate::envelope::{StartConversation, StartConversationWrapper};
use crate::error::{Error, Result};
use crate::logging::RedactedAddress;
use std::sync::Arc;

/// Length of a session token in characters.
pub const TOKEN_LENGTH: usize = 128;

/// Encrypt and sign a [`StartConversation`] into a wrapper tagged with `id`.
pub fn seal_start(
    self_keys: &KeyPair,
    remote_public: &PublicKey,
    id: &str,
    start: &StartConversation,
) -> Result<StartConversationWrapper> {
    let json = serde_json::to_vec(start).map_err(|e| Error::Encoding(e.to_string()))?;
    let sealed = crypto::encrypt_and_sign(self_keys.private_key(), remote_public, &json)?;

    Ok(StartConversationWrapper {
        encryption_type: self_keys.key_type().to_string(),
        id: id.to_string(),
        auth: sealed.ciphertext,
        signature: sealed.signature,
    })
}

/// Decrypt and verify the [`StartConversation`] inside `wrapper`.
///
/// The declared scheme must match `self_keys`.
pub fn open_start(
    self_keys: &KeyPair,
    remote_public: &PublicKey,
    wrapper: &StartConversationWrapper,
) -> Result<StartConversation> {
    let declared = wrapper.key_type()?;
    if declared != self_keys.key_type() {
        return Err(Error::InvalidKeyType(format!(
            "handshake declares {}, local keys are {}",
            declared,
            self_keys.key_type()
        )));
    }

    let json = crypto::decrypt_and_verify(
        self_keys.private_key(),
        remote_public,
        &wrapper.auth,
        &wrapper.signature,
    )?;
    serde_json::from_slice(&json).map_err(|e| Error::MalformedEnvelope(e.to_string()))
}

/// Initiator side: create a pending conversation and the token to hand over.
pub fn generate_conversation(
    self_address: &str,
    self_keys: Arc<KeyPair>,
    remote_public: Arc<PublicKey>,
    key_type: KeyType,
    alias: &str,
) -> Result<(String, Conversation)> {
    if self_keys.key_type() != key_type {
        return Err(Error::InvalidKeyType(format!(
            "requested {}, local keys are {}",
            key_type,
            self_keys.key_type()
        )));
    }

    let start = StartConversation {
        address: self_address.to_string(),
        token: crypto::random_token(TOKEN_LENGTH),
    };
    let id = uuid::Uuid::new_v4().to_string();

    let wrapper = seal_start(&self_keys, &remote_public, &id, &start)?;
    let token = wrapper.to_token()?;

    let conversation =
        Conversation::new_initiator(id, alias.to_string(), start.token, self_keys, remote_public)?;

    tracing::debug!(id = %conversation.id(), key_type = %key_type, "Generated handshake token");

    Ok((token, conversation))
}

/// Responder side: consume a token, create an established conversation and
/// the acknowledgement to POST to the initiator's `/bootstrap`.
pub fn bootstrap_conversation(
    token: &str,
    self_address: &str,
    self_keys: Arc<KeyPair>,
    remote_public: Arc<PublicKey>,
    alias: &str,
) -> Result<(Conversation, StartConversationWrapper)> {
    let offer = StartConversationWrapper::from_token(token)?;
    let remote = open_start(&self_keys, &remote_public, &offer)?;

    let start = StartConversation {
        address: self_address.to_string(),
        token: crypto::random_token(TOKEN_LENGTH),
    };
    let ack = seal_start(&self_keys, &remote_public, &offer.id, &start)?;

    tracing::debug!(
        id = %offer.id,
        peer = %RedactedAddress(&remote.address),
        "Accepted handshake token"
    );

    let conversation = Conversation::new_responder(
        offer.id,
        alias.to_string(),
        start.token,
        remote.token,
        remote.address,
        self_keys,
        remote_public,
    )?;

    Ok((conversation, ack))
}

/// Initiator side: apply the responder's acknowledgement.
pub fn accept_acknowledgement(
    conversation: &mut Conversation,
    ack: &StartConversationWrapper,
) -> Result<()> {
    if conversation.is_ended() {
        return Err(Error::ConversationEnded);
    }
    if conversation.is_established() {
        return Err(Error::AlreadyEstablished);
    }

    let remote = open_start(conversation.self_keys(), conversation.remote_public(), ack)?;
    conversation.establish(remote.address, remote.token)
}
