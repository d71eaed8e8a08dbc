//! OpenPGP: one armored message, signed by the sender's primary key and
//! encrypted to the recipient's first subkey.

use super::{CryptoScheme, Sealed};
use crate::error::{Error, Result};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::{ArmorOptions, Deserializable, Message, SignedPublicKey, SignedSecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

pub(crate) struct PgpScheme;

impl CryptoScheme for PgpScheme {
    type Private = SignedSecretKey;
    type Public = SignedPublicKey;

    fn encrypt_and_sign(
        self_private: &SignedSecretKey,
        peer_public: &SignedPublicKey,
        plaintext: &[u8],
    ) -> Result<Sealed> {
        let subkey = peer_public
            .public_subkeys
            .first()
            .ok_or_else(|| Error::InvalidKey("public key has no encryption subkey".into()))?;

        let armored = Message::new_literal_bytes("", plaintext)
            .sign(&mut OsRng, self_private, String::new, HashAlgorithm::SHA2_256)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .encrypt_to_keys_seipdv1(&mut OsRng, SymmetricKeyAlgorithm::AES256, &[subkey])
            .map_err(|e| Error::Crypto(e.to_string()))?
            .to_armored_string(ArmorOptions::default())
            .map_err(|e| Error::Crypto(e.to_string()))?;

        Ok(Sealed {
            ciphertext: armored.into_bytes(),
            signature: Vec::new(),
        })
    }

    fn decrypt_and_verify(
        self_private: &SignedSecretKey,
        peer_public: &SignedPublicKey,
        ciphertext: &[u8],
        _signature: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let armored = std::str::from_utf8(ciphertext)
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?;

        let (message, _headers) =
            Message::from_string(armored).map_err(|e| Error::DecryptionFailed(e.to_string()))?;

        let (mut message, _key_ids) = message
            .decrypt(String::new, &[self_private])
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?;

        if let Message::Compressed(_) = message {
            message = message
                .decompress()
                .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
        }

        message
            .verify(peer_public)
            .map_err(|e| Error::VerificationFailed(e.to_string()))?;

        message
            .get_content()
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?
            .map(Zeroizing::new)
            .ok_or_else(|| Error::DecryptionFailed("message has no literal content".into()))
    }
}
