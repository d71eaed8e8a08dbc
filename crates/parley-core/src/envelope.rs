//! Wire and out-of-band envelope formats.
//!
//! Byte fields travel as standard padded base64 strings inside JSON. A JSON
//! `null` for a byte field decodes as empty.
//!
//! ## Formats
//!
//! - [`SignedEnvelope`]: `base64(JSON{message, signature, pubkey})`, a single
//!   encrypted artifact plus the sender's public key, pasted by hand
//! - [`StartConversationWrapper`]: handshake offer or acknowledgement; the
//!   transportable token is `base64(JSON(wrapper))`, the `/bootstrap` body is
//!   the bare JSON
//! - [`MessageWrapper`]: `/message` body

use crate::crypto::{self, KeyPair, KeyType, PublicKey};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => BASE64.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Plaintext handshake payload, always sent encrypted and signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConversation {
    /// Onion address of the sender.
    pub address: String,
    /// The sender's session token.
    pub token: String,
}

/// Envelope around an encrypted [`StartConversation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConversationWrapper {
    /// Scheme tag, `rsa` or `pgp`.
    pub encryption_type: String,
    /// Conversation ID chosen by the initiator.
    pub id: String,
    /// Encrypted [`StartConversation`].
    #[serde(with = "base64_bytes", default)]
    pub auth: Vec<u8>,
    /// Detached signature; empty for PGP.
    #[serde(with = "base64_bytes", default)]
    pub signature: Vec<u8>,
}

impl StartConversationWrapper {
    /// Parse the scheme tag.
    pub fn key_type(&self) -> Result<KeyType> {
        self.encryption_type.parse()
    }

    /// JSON body for `/bootstrap`.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encoding(e.to_string()))
    }

    /// Parse a `/bootstrap` body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }

    /// Transportable handshake token.
    pub fn to_token(&self) -> Result<String> {
        Ok(BASE64.encode(self.to_json()?))
    }

    /// Parse a handshake token. Surrounding whitespace is ignored.
    pub fn from_token(token: &str) -> Result<Self> {
        let json = BASE64
            .decode(token.trim())
            .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
        Self::from_json(&json)
    }
}

/// Envelope around an encrypted conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWrapper {
    /// Encrypted message JSON.
    #[serde(with = "base64_bytes", default)]
    pub message: Vec<u8>,
    /// Detached signature; empty for PGP.
    #[serde(with = "base64_bytes", default)]
    pub signature: Vec<u8>,
    /// Conversation ID.
    pub id: String,
}

impl MessageWrapper {
    /// JSON body for `/message`.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Encoding(e.to_string()))
    }

    /// Parse a `/message` body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}

/// Ad-hoc envelope: one encrypted artifact plus the sender's public key text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Ciphertext.
    #[serde(with = "base64_bytes", default)]
    pub message: Vec<u8>,
    /// Detached signature; empty for PGP.
    #[serde(with = "base64_bytes", default)]
    pub signature: Vec<u8>,
    /// Sender's public key text.
    #[serde(with = "base64_bytes", default)]
    pub pubkey: Vec<u8>,
}

impl SignedEnvelope {
    /// Encode as `base64(JSON)`.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Exact inverse of [`SignedEnvelope::encode`].
    pub fn decode(text: &str) -> Result<Self> {
        let json = BASE64
            .decode(text.trim())
            .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}

/// Encrypt `text` for `recipient` and package it with the sender's public key.
pub fn seal_for(recipient: &PublicKey, sender: &KeyPair, text: &str) -> Result<String> {
    let sealed = crypto::encrypt_and_sign(sender.private_key(), recipient, text.as_bytes())?;
    SignedEnvelope {
        message: sealed.ciphertext,
        signature: sealed.signature,
        pubkey: sender.public_key().to_text()?.into_bytes(),
    }
    .encode()
}

/// Plaintext and sender key recovered by [`open_envelope`].
#[derive(Debug)]
pub struct OpenedEnvelope {
    /// Decrypted text.
    pub plaintext: Zeroizing<String>,
    /// The sender's public key as carried in the envelope.
    pub sender_public: PublicKey,
    /// The sender's public key text.
    pub sender_public_text: String,
}

/// Decode, decrypt and verify an envelope produced by [`seal_for`].
///
/// The embedded sender key is parsed with the recipient's scheme.
pub fn open_envelope(envelope: &str, recipient: &KeyPair) -> Result<OpenedEnvelope> {
    let envelope = SignedEnvelope::decode(envelope)?;

    let sender_public_text = String::from_utf8(envelope.pubkey)
        .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
    let sender_public = PublicKey::from_text(recipient.key_type(), &sender_public_text)?;

    let plaintext = crypto::decrypt_and_verify(
        recipient.private_key(),
        &sender_public,
        &envelope.message,
        &envelope.signature,
    )?;
    let plaintext = String::from_utf8(plaintext.to_vec())
        .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

    Ok(OpenedEnvelope {
        plaintext: Zeroizing::new(plaintext),
        sender_public,
        sender_public_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_signed_envelope_idempotence() {
        let cases = [
            SignedEnvelope::default(),
            SignedEnvelope {
                message: vec![0, 1, 2, 255],
                signature: Vec::new(),
                pubkey: b"-----BEGIN RSA PUBLIC KEY-----".to_vec(),
            },
            SignedEnvelope {
                message: vec![42; 1024],
                signature: vec![7; 512],
                pubkey: Vec::new(),
            },
        ];
        for env in cases {
            let decoded = SignedEnvelope::decode(&env.encode().expect("encode")).expect("decode");
            assert_eq!(decoded, env);
        }
    }

    #[test]
    fn test_wrapper_idempotence() {
        let start = StartConversationWrapper {
            encryption_type: "pgp".into(),
            id: "0d6f2a4c-6a0e-4a9f-9a59-2a3c2f9f0b11".into(),
            auth: b"armored".to_vec(),
            signature: Vec::new(),
        };
        let token = start.to_token().expect("token");
        assert_eq!(StartConversationWrapper::from_token(&token).expect("decode"), start);
        assert_eq!(
            StartConversationWrapper::from_token(&format!("  {}\n", token)).expect("decode"),
            start
        );

        let msg = MessageWrapper {
            message: vec![1, 2, 3],
            signature: vec![],
            id: String::new(),
        };
        assert_eq!(MessageWrapper::from_json(&msg.to_json().expect("json")).expect("parse"), msg);
    }

    #[test]
    fn test_wire_field_names() {
        let msg = MessageWrapper {
            message: b"hi".to_vec(),
            signature: Vec::new(),
            id: "abc".into(),
        };
        let json: serde_json::Value = serde_json::from_slice(&msg.to_json().expect("json")).expect("value");
        assert_eq!(json["message"], "aGk=");
        assert_eq!(json["signature"], "");
        assert_eq!(json["id"], "abc");

        // Go-style encoders write nil byte slices as null.
        let parsed = StartConversationWrapper::from_json(
            br#"{"encryption_type":"rsa","id":"x","auth":"aGk=","signature":null}"#,
        )
        .expect("parse");
        assert_eq!(parsed.auth, b"hi");
        assert!(parsed.signature.is_empty());
        assert_eq!(parsed.key_type().expect("tag"), KeyType::Rsa);
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(matches!(SignedEnvelope::decode("***"), Err(Error::MalformedEnvelope(_))));
        assert!(matches!(
            SignedEnvelope::decode(&BASE64.encode(b"{not json")),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            SignedEnvelope::decode(&BASE64.encode(br#"{"message":"!!"}"#)),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            StartConversationWrapper::from_token("bm90IGpzb24="),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(MessageWrapper::from_json(b""), Err(Error::MalformedEnvelope(_))));

        let bad_tag = StartConversationWrapper {
            encryption_type: "dsa".into(),
            id: String::new(),
            auth: Vec::new(),
            signature: Vec::new(),
        };
        assert!(matches!(bad_tag.key_type(), Err(Error::InvalidKeyType(_))));
    }

    #[test]
    fn test_seal_for_open_envelope() {
        let alice = test_support::alice_rsa();
        let bob = test_support::bob_rsa();

        let envelope = seal_for(bob.public_key(), &alice, "meet at the usual place").expect("seal");
        let opened = open_envelope(&envelope, &bob).expect("open");

        assert_eq!(opened.plaintext.as_str(), "meet at the usual place");
        assert_eq!(opened.sender_public_text, alice.public_key().to_text().expect("export"));
        assert_eq!(opened.sender_public.key_type(), KeyType::Rsa);

        // Alice cannot read what she sent to Bob.
        assert!(open_envelope(&envelope, &alice).is_err());
    }

    #[test]
    fn test_open_envelope_rejects_swapped_pubkey() {
        let alice = test_support::alice_rsa();
        let bob = test_support::bob_rsa();

        let envelope = seal_for(bob.public_key(), &alice, "hi").expect("seal");
        let mut decoded = SignedEnvelope::decode(&envelope).expect("decode");
        decoded.pubkey = bob.public_key().to_text().expect("export").into_bytes();

        assert!(matches!(
            open_envelope(&decoded.encode().expect("encode"), &bob),
            Err(Error::VerificationFailed(_))
        ));
    }
}
