//! Crypto capability for Parley.
//!
//! Two interchangeable asymmetric schemes sit behind one contract:
//!
//! - **RSA**: PKCS#1 v1.5 encryption, detached PKCS#1 v1.5 SHA-256 signature
//! - **PGP**: OpenPGP sign-then-encrypt; the signature lives inside the
//!   armored ciphertext and `signature` is always empty
//!
//! Callers go through [`encrypt_and_sign`] and [`decrypt_and_verify`] and
//! never branch on the scheme themselves.

mod keys;
mod pgp_scheme;
mod rsa_scheme;
mod seal;

pub use keys::{
    generate_pgp, generate_rsa, KeyPair, KeyType, PrivateKey, PublicKey, DEFAULT_PGP_USER_ID,
    MIN_RSA_BITS, PGP_RSA_BITS,
};
pub use seal::{open_with_password, seal_with_password};

use crate::error::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use zeroize::Zeroizing;

/// Output of [`encrypt_and_sign`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sealed {
    /// Encrypted payload.
    pub ciphertext: Vec<u8>,
    /// Detached signature; empty for schemes that embed it.
    pub signature: Vec<u8>,
}

/// One asymmetric scheme.
pub(crate) trait CryptoScheme {
    type Private;
    type Public;

    fn encrypt_and_sign(
        self_private: &Self::Private,
        peer_public: &Self::Public,
        plaintext: &[u8],
    ) -> Result<Sealed>;

    fn decrypt_and_verify(
        self_private: &Self::Private,
        peer_public: &Self::Public,
        ciphertext: &[u8],
        signature: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;
}

/// Encrypt `plaintext` for `peer_public` and sign it with `self_private`.
///
/// Both keys must belong to the same scheme.
pub fn encrypt_and_sign(
    self_private: &PrivateKey,
    peer_public: &PublicKey,
    plaintext: &[u8],
) -> Result<Sealed> {
    match (self_private, peer_public) {
        (PrivateKey::Rsa(sk), PublicKey::Rsa(pk)) => {
            rsa_scheme::RsaScheme::encrypt_and_sign(sk, pk, plaintext)
        }
        (PrivateKey::Pgp(sk), PublicKey::Pgp(pk)) => {
            pgp_scheme::PgpScheme::encrypt_and_sign(sk, pk, plaintext)
        }
        _ => Err(mismatch(self_private, peer_public)),
    }
}

/// Decrypt with `self_private` and verify the sender against `peer_public`.
///
/// Fails with [`Error::DecryptionFailed`] or [`Error::VerificationFailed`];
/// never returns altered plaintext.
pub fn decrypt_and_verify(
    self_private: &PrivateKey,
    peer_public: &PublicKey,
    ciphertext: &[u8],
    signature: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    match (self_private, peer_public) {
        (PrivateKey::Rsa(sk), PublicKey::Rsa(pk)) => {
            rsa_scheme::RsaScheme::decrypt_and_verify(sk, pk, ciphertext, signature)
        }
        (PrivateKey::Pgp(sk), PublicKey::Pgp(pk)) => {
            pgp_scheme::PgpScheme::decrypt_and_verify(sk, pk, ciphertext, signature)
        }
        _ => Err(mismatch(self_private, peer_public)),
    }
}

fn mismatch(self_private: &PrivateKey, peer_public: &PublicKey) -> Error {
    Error::InvalidKeyType(format!(
        "{} private key with {} public key",
        self_private.key_type(),
        peer_public.key_type()
    ))
}

/// Random alphanumeric string from the OS RNG.
pub fn random_token(len: usize) -> String {
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Constant-time comparison of byte slices.
///
/// Prevents timing attacks when comparing secrets.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_rsa_roundtrip() {
        let alice = test_support::alice_rsa();
        let bob = test_support::bob_rsa();

        for text in [&b""[..], b"hi", "\u{1F600} unicode".as_bytes(), &[0u8; 400]] {
            let sealed = encrypt_and_sign(alice.private_key(), bob.public_key(), text).expect("seal");
            assert!(!sealed.signature.is_empty());
            let opened = decrypt_and_verify(
                bob.private_key(),
                alice.public_key(),
                &sealed.ciphertext,
                &sealed.signature,
            )
            .expect("open");
            assert_eq!(&opened[..], text);
        }
    }

    #[test]
    fn test_rsa_tamper_detection() {
        let alice = test_support::alice_rsa();
        let bob = test_support::bob_rsa();
        let sealed = encrypt_and_sign(alice.private_key(), bob.public_key(), b"attack at dawn")
            .expect("seal");

        for i in [0, sealed.ciphertext.len() / 2, sealed.ciphertext.len() - 1] {
            let mut ct = sealed.ciphertext.clone();
            ct[i] ^= 0x01;
            assert!(decrypt_and_verify(bob.private_key(), alice.public_key(), &ct, &sealed.signature).is_err());
        }

        for i in [0, sealed.signature.len() / 2, sealed.signature.len() - 1] {
            let mut sig = sealed.signature.clone();
            sig[i] ^= 0x80;
            assert!(matches!(
                decrypt_and_verify(bob.private_key(), alice.public_key(), &sealed.ciphertext, &sig),
                Err(Error::VerificationFailed(_))
            ));
        }
    }

    #[test]
    fn test_rsa_empty_fields_rejected() {
        let alice = test_support::alice_rsa();
        let bob = test_support::bob_rsa();
        let sealed = encrypt_and_sign(alice.private_key(), bob.public_key(), b"x").expect("seal");

        assert!(matches!(
            decrypt_and_verify(bob.private_key(), alice.public_key(), &[], &sealed.signature),
            Err(Error::DecryptionFailed(_))
        ));
        assert!(matches!(
            decrypt_and_verify(bob.private_key(), alice.public_key(), &sealed.ciphertext, &[]),
            Err(Error::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_rsa_wrong_sender_fails_verification() {
        let alice = test_support::alice_rsa();
        let bob = test_support::bob_rsa();
        let sealed = encrypt_and_sign(alice.private_key(), bob.public_key(), b"x").expect("seal");

        // Bob expects the message from himself, not Alice.
        assert!(matches!(
            decrypt_and_verify(bob.private_key(), bob.public_key(), &sealed.ciphertext, &sealed.signature),
            Err(Error::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_rsa_plaintext_limit() {
        let alice = test_support::alice_rsa();
        let bob = test_support::bob_rsa();
        // 4096-bit modulus leaves 512 - 11 bytes for PKCS#1 v1.5 padding.
        assert!(encrypt_and_sign(alice.private_key(), bob.public_key(), &[7u8; 501]).is_ok());
        assert!(matches!(
            encrypt_and_sign(alice.private_key(), bob.public_key(), &[7u8; 502]),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_pgp_roundtrip_embeds_signature() {
        let alice = test_support::alice_pgp();
        let bob = test_support::bob_pgp();

        let sealed = encrypt_and_sign(alice.private_key(), bob.public_key(), b"hello over pgp")
            .expect("seal");
        assert!(sealed.signature.is_empty());
        assert!(String::from_utf8_lossy(&sealed.ciphertext).contains("BEGIN PGP MESSAGE"));

        let opened = decrypt_and_verify(bob.private_key(), alice.public_key(), &sealed.ciphertext, &[])
            .expect("open");
        assert_eq!(&opened[..], b"hello over pgp");
    }

    #[test]
    fn test_pgp_wrong_sender_fails() {
        let alice = test_support::alice_pgp();
        let bob = test_support::bob_pgp();
        let sealed = encrypt_and_sign(alice.private_key(), bob.public_key(), b"x").expect("seal");

        assert!(decrypt_and_verify(bob.private_key(), bob.public_key(), &sealed.ciphertext, &[]).is_err());
        assert!(decrypt_and_verify(alice.private_key(), alice.public_key(), &sealed.ciphertext, &[]).is_err());
    }

    #[test]
    fn test_pgp_tamper_detection() {
        let alice = test_support::alice_pgp();
        let bob = test_support::bob_pgp();
        let sealed = encrypt_and_sign(alice.private_key(), bob.public_key(), b"attack at dawn")
            .expect("seal");

        let mut ct = sealed.ciphertext.clone();
        let mid = ct.len() / 2;
        ct[mid] = if ct[mid] == b'A' { b'B' } else { b'A' };
        assert!(decrypt_and_verify(bob.private_key(), alice.public_key(), &ct, &[]).is_err());
        assert!(decrypt_and_verify(bob.private_key(), alice.public_key(), b"not armored", &[]).is_err());
    }

    #[test]
    fn test_mixed_schemes_rejected() {
        let rsa = test_support::alice_rsa();
        let pgp = test_support::bob_pgp();
        assert!(matches!(
            encrypt_and_sign(rsa.private_key(), pgp.public_key(), b"x"),
            Err(Error::InvalidKeyType(_))
        ));
        assert!(matches!(
            decrypt_and_verify(pgp.private_key(), rsa.public_key(), b"x", b"y"),
            Err(Error::InvalidKeyType(_))
        ));
    }

    #[test]
    fn test_random_token() {
        let a = random_token(128);
        let b = random_token(128);
        assert_eq!(a.len(), 128);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hi"));
    }
}
