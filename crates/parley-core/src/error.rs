//! Error types for Parley.
//!
//! Display strings are deliberately generic. The `String` payloads carry
//! detail for local logs only and must never be echoed to a remote peer.

use thiserror::Error;

/// Core error type for Parley operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Base64 or JSON framing could not be parsed.
    #[error("malformed envelope")]
    MalformedEnvelope(String),

    /// Ciphertext could not be decrypted with our private key.
    #[error("decryption failed")]
    DecryptionFailed(String),

    /// Signature did not verify against the peer's public key.
    #[error("signature verification failed")]
    VerificationFailed(String),

    /// Message carried a session token other than ours.
    #[error("authentication failed")]
    AuthenticationMismatch,

    /// No conversation is registered under the given ID.
    #[error("unknown conversation")]
    UnknownConversation,

    /// The conversation has ended and accepts no further messages.
    #[error("conversation ended")]
    ConversationEnded,

    /// The handshake has not completed on this side yet.
    #[error("conversation not established")]
    NotEstablished,

    /// A second acknowledgement arrived for an established conversation.
    #[error("conversation already established")]
    AlreadyEstablished,

    /// A conversation with this ID is already registered.
    #[error("conversation already registered")]
    DuplicateConversation,

    /// Peer answered with a non-200 status or could not be reached.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Unrecognized algorithm tag, or key handles of different schemes.
    #[error("invalid key type: {0}")]
    InvalidKeyType(String),

    /// Key validation, import or generation failed.
    #[error("invalid key material")]
    InvalidKey(String),

    /// Any other cryptographic failure (e.g. plaintext too large).
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// Serialization of an outbound structure failed.
    #[error("encoding error")]
    Encoding(String),

    /// Tor control port or onion service error.
    #[error("tor error")]
    Tor(String),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local I/O failure.
    #[error("i/o error")]
    Io(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Result type alias using Parley's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether an inbound request failing with this error is answered with a
    /// bare 401. A remote peer must not learn which check rejected it.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Error::MalformedEnvelope(_)
                | Error::DecryptionFailed(_)
                | Error::VerificationFailed(_)
                | Error::AuthenticationMismatch
                | Error::UnknownConversation
                | Error::ConversationEnded
                | Error::AlreadyEstablished
                | Error::InvalidKeyType(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedEnvelope(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::MalformedEnvelope(e.to_string())
    }
}
