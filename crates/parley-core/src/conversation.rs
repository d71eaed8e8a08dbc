//! Per-session conversation state.
//!
//! ```text
//! Pending ──(acknowledgement)──> Established ──(final message)──> Ended
//! ```
//!
//! A responder-created conversation starts in `Established`. Both flags are
//! monotone: `established` and `ended` flip to `true` at most once and never
//! back.
//!
//! ## Known limitation
//!
//! Every inbound message is bound to the session by a static token: the
//! sender echoes the receiver's `self_token`, learned during the handshake.
//! This proves the sender completed *this* handshake, but the token never
//! changes, so a captured envelope replayed within a live session is
//! accepted again. There is no sequence number or nonce.

use crate::crypto::{self, KeyPair, KeyType, PublicKey};
use crate::envelope::MessageWrapper;
use crate::error::{Error, Result};
use crate::logging::{RedactedAddress, RedactedToken};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message body.
    pub text: String,
    /// Send time, seconds since the Unix epoch.
    #[serde(rename = "time")]
    pub unix_time: i64,
    /// The sender's copy of the receiver's session token.
    pub token: String,
    /// Marks the last message of a conversation.
    pub final_message: bool,
    /// Whether this side wrote the message. Local only.
    #[serde(skip)]
    pub from_self: bool,
}

/// Lifecycle state derived from the `established` and `ended` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    /// Created, handshake not yet complete on this side.
    Pending,
    /// Handshake complete, messages flow.
    Established,
    /// Terminal.
    Ended,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversationState::Pending => "pending",
            ConversationState::Established => "active",
            ConversationState::Ended => "ended",
        };
        f.pad(label)
    }
}

/// Notification published when a conversation changes.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// A conversation was registered.
    Created {
        /// Conversation ID.
        id: String,
        /// Display label.
        alias: String,
    },
    /// The handshake completed on this side.
    Established {
        /// Conversation ID.
        id: String,
    },
    /// A peer message was accepted.
    MessageReceived {
        /// Conversation ID.
        id: String,
        /// The accepted message.
        message: Message,
    },
    /// A local message was delivered.
    MessageSent {
        /// Conversation ID.
        id: String,
        /// The delivered message.
        message: Message,
    },
    /// The conversation reached its terminal state.
    Ended {
        /// Conversation ID.
        id: String,
    },
    /// The conversation was removed from the registry.
    Deleted {
        /// Conversation ID.
        id: String,
    },
}

/// Snapshot used for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    /// Conversation ID.
    pub id: String,
    /// Display label.
    pub alias: String,
    /// Scheme of this session.
    pub key_type: KeyType,
    /// Lifecycle state.
    pub state: ConversationState,
    /// Peer onion address; empty until known.
    pub remote_address: String,
    /// Number of messages in local history.
    pub message_count: usize,
}

/// One two-party session.
#[derive(Clone)]
pub struct Conversation {
    id: String,
    alias: String,
    key_type: KeyType,
    self_token: String,
    remote_token: String,
    self_keys: Arc<KeyPair>,
    remote_public: Arc<PublicKey>,
    remote_address: String,
    established: bool,
    ended: bool,
    messages: Vec<Message>,
}

impl Conversation {
    /// A conversation on the initiating side: pending, peer address unknown.
    pub fn new_initiator(
        id: String,
        alias: String,
        self_token: String,
        self_keys: Arc<KeyPair>,
        remote_public: Arc<PublicKey>,
    ) -> Result<Self> {
        let key_type = check_key_types(&self_keys, &remote_public)?;
        Ok(Self {
            id,
            alias,
            key_type,
            self_token,
            remote_token: String::new(),
            self_keys,
            remote_public,
            remote_address: String::new(),
            established: false,
            ended: false,
            messages: Vec::new(),
        })
    }

    /// A conversation on the responding side, established at construction.
    pub fn new_responder(
        id: String,
        alias: String,
        self_token: String,
        remote_token: String,
        remote_address: String,
        self_keys: Arc<KeyPair>,
        remote_public: Arc<PublicKey>,
    ) -> Result<Self> {
        let key_type = check_key_types(&self_keys, &remote_public)?;
        Ok(Self {
            id,
            alias,
            key_type,
            self_token,
            remote_token,
            self_keys,
            remote_public,
            remote_address,
            established: true,
            ended: false,
            messages: Vec::new(),
        })
    }

    /// Conversation ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display label.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Scheme of this session.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// This side's session token.
    pub fn self_token(&self) -> &str {
        &self.self_token
    }

    /// The peer's session token; empty until learned.
    pub fn remote_token(&self) -> &str {
        &self.remote_token
    }

    /// Peer onion address; empty until learned.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// This side's keys.
    pub fn self_keys(&self) -> &KeyPair {
        &self.self_keys
    }

    /// The peer's public key.
    pub fn remote_public(&self) -> &PublicKey {
        &self.remote_public
    }

    /// Handshake complete on this side.
    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Terminal state reached.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConversationState {
        if self.ended {
            ConversationState::Ended
        } else if self.established {
            ConversationState::Established
        } else {
            ConversationState::Pending
        }
    }

    /// Local history in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Listing snapshot.
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            alias: self.alias.clone(),
            key_type: self.key_type,
            state: self.state(),
            remote_address: self.remote_address.clone(),
            message_count: self.messages.len(),
        }
    }

    /// Build the `/message` body for `text`.
    ///
    /// Does not touch `ended`; the caller decides when a final message ends
    /// the conversation.
    pub fn pack_message(&self, text: &str, final_message: bool) -> Result<(Vec<u8>, Message)> {
        let message = Message {
            text: text.to_string(),
            unix_time: chrono::Utc::now().timestamp(),
            token: self.remote_token.clone(),
            final_message,
            from_self: true,
        };

        let json = serde_json::to_vec(&message).map_err(|e| Error::Encoding(e.to_string()))?;
        let sealed = crypto::encrypt_and_sign(
            self.self_keys.private_key(),
            &self.remote_public,
            &json,
        )?;

        let body = MessageWrapper {
            message: sealed.ciphertext,
            signature: sealed.signature,
            id: self.id.clone(),
        }
        .to_json()?;

        Ok((body, message))
    }

    /// Decrypt, verify and authenticate an inbound message.
    ///
    /// The caller appends the result and reacts to `final_message`.
    pub fn unpack_message(&self, ciphertext: &[u8], signature: &[u8]) -> Result<Message> {
        if self.ended {
            return Err(Error::ConversationEnded);
        }

        let json = crypto::decrypt_and_verify(
            self.self_keys.private_key(),
            &self.remote_public,
            ciphertext,
            signature,
        )?;
        let mut message: Message =
            serde_json::from_slice(&json).map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

        if !crypto::constant_time_eq(message.token.as_bytes(), self.self_token.as_bytes()) {
            tracing::debug!(id = %self.id, "Rejected message with foreign session token");
            return Err(Error::AuthenticationMismatch);
        }

        message.from_self = false;
        Ok(message)
    }

    /// Record the peer's address and token from its acknowledgement.
    pub fn establish(&mut self, remote_address: String, remote_token: String) -> Result<()> {
        if self.ended {
            return Err(Error::ConversationEnded);
        }
        if self.established {
            return Err(Error::AlreadyEstablished);
        }

        tracing::debug!(
            id = %self.id,
            peer = %RedactedAddress(&remote_address),
            token = %RedactedToken(&remote_token),
            "Conversation established"
        );

        self.remote_address = remote_address;
        self.remote_token = remote_token;
        self.established = true;
        Ok(())
    }

    /// Enter the terminal state. Returns `false` if already ended.
    pub fn end(&mut self) -> bool {
        let changed = !self.ended;
        self.ended = true;
        changed
    }

    /// Append to local history.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("key_type", &self.key_type)
            .field("self_token", &RedactedToken(&self.self_token))
            .field("remote_token", &RedactedToken(&self.remote_token))
            .field("remote_address", &RedactedAddress(&self.remote_address))
            .field("established", &self.established)
            .field("ended", &self.ended)
            .field("messages", &self.messages.len())
            .finish()
    }
}

fn check_key_types(self_keys: &KeyPair, remote_public: &PublicKey) -> Result<KeyType> {
    let key_type = self_keys.key_type();
    if remote_public.key_type() != key_type {
        return Err(Error::InvalidKeyType(format!(
            "{} keys with {} peer key",
            key_type,
            remote_public.key_type()
        )));
    }
    Ok(key_type)
}
