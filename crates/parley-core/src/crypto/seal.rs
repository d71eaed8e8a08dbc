//! Password sealing for exported private keys.
//!
//! Output format, base64-encoded as a single line:
//!
//! ```text
//! salt (16 bytes) || nonce (12 bytes) || ciphertext || tag (16 bytes)
//! ```
//!
//! The key is Argon2id(password, salt).

use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

/// Size of the Argon2 salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Size of the ChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 tag in bytes.
pub const TAG_SIZE: usize = 16;

const KEY_SIZE: usize = 32;

// Interactive parameters: 64 MiB, 3 passes, 1 lane.
const ARGON2_M_COST: u32 = 64 * 1024;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 1;

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(KEY_SIZE))
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` under a key derived from `password`.
pub fn seal_with_password(password: &str, plaintext: &[u8]) -> Result<String> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    let mut output = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(output))
}

/// Reverse [`seal_with_password`]. A wrong password fails with
/// [`Error::DecryptionFailed`].
pub fn open_with_password(password: &str, sealed: &str) -> Result<Zeroizing<Vec<u8>>> {
    let data = BASE64
        .decode(sealed.trim())
        .map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

    if data.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed("sealed key too short".into()));
    }

    let (salt, rest) = data.split_at(SALT_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let key = derive_key(password, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptionFailed("wrong password or corrupted key".into()))?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let sealed = seal_with_password("correct horse", b"-----BEGIN KEY-----").expect("seal");
        let opened = open_with_password("correct horse", &sealed).expect("open");
        assert_eq!(&opened[..], b"-----BEGIN KEY-----");
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = seal_with_password("correct horse", b"secret").expect("seal");
        assert!(matches!(
            open_with_password("battery staple", &sealed),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_fresh_salt_per_seal() {
        let a = seal_with_password("pw", b"same").expect("seal");
        let b = seal_with_password("pw", b"same").expect("seal");
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let short = BASE64.encode([0u8; SALT_SIZE + NONCE_SIZE]);
        assert!(open_with_password("pw", &short).is_err());
        assert!(matches!(
            open_with_password("pw", "not base64!!"),
            Err(Error::MalformedEnvelope(_))
        ));
    }
}
