//! RSA: PKCS#1 v1.5 encryption with a detached PKCS#1 v1.5 SHA-256 signature
//! over the plaintext.
//!
//! Raw PKCS#1 v1.5 bounds the plaintext at `modulus_bytes - 11`, i.e. 501
//! bytes for a 4096-bit key. Larger payloads fail with [`Error::Crypto`].

use super::{CryptoScheme, Sealed};
use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

pub(crate) struct RsaScheme;

impl CryptoScheme for RsaScheme {
    type Private = RsaPrivateKey;
    type Public = RsaPublicKey;

    fn encrypt_and_sign(
        self_private: &RsaPrivateKey,
        peer_public: &RsaPublicKey,
        plaintext: &[u8],
    ) -> Result<Sealed> {
        let ciphertext = peer_public
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let signing_key = SigningKey::<Sha256>::new(self_private.clone());
        let signature = signing_key.sign_with_rng(&mut OsRng, plaintext).to_vec();

        Ok(Sealed { ciphertext, signature })
    }

    fn decrypt_and_verify(
        self_private: &RsaPrivateKey,
        peer_public: &RsaPublicKey,
        ciphertext: &[u8],
        signature: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if ciphertext.is_empty() {
            return Err(Error::DecryptionFailed("empty ciphertext".into()));
        }
        if signature.is_empty() {
            return Err(Error::VerificationFailed("empty signature".into()));
        }

        let plaintext = Zeroizing::new(
            self_private
                .decrypt(Pkcs1v15Encrypt, ciphertext)
                .map_err(|e| Error::DecryptionFailed(e.to_string()))?,
        );

        let signature =
            Signature::try_from(signature).map_err(|e| Error::VerificationFailed(e.to_string()))?;
        VerifyingKey::<Sha256>::new(peer_public.clone())
            .verify(&plaintext, &signature)
            .map_err(|e| Error::VerificationFailed(e.to_string()))?;

        Ok(plaintext)
    }
}
