//! Password-derived symmetric encryption for the wire protocol.
//!
//! Both endpoints derive the same ChaCha20-Poly1305 key from the shared
//! password, so no key material ever crosses the wire. Every payload is
//! authenticated: a tampered frame or a mismatched key fails decryption
//! deterministically instead of producing garbage.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or corrupted data)")]
    Decrypt,
}

/// Session key derived from the shared password. Zeroed on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Derive a session key from a password.
///
/// The UTF-8 bytes of the password are right-padded with ASCII spaces to
/// 32 bytes, then truncated. The rule is fixed so both peers derive
/// identical keys without exchanging anything.
pub fn derive_key(password: &str) -> Key {
    let mut key = [b' '; KEY_LEN];
    let bytes = password.as_bytes();
    let n = bytes.len().min(KEY_LEN);
    key[..n].copy_from_slice(&bytes[..n]);
    Key(key)
}

/// Encrypt a payload. Output layout: `nonce(12) || ciphertext+tag`.
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend(ciphertext);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` payload produced by [`encrypt`].
pub fn decrypt(key: &Key, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decrypt);
    }

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(&data[..NONCE_LEN]);

    cipher
        .decrypt(nonce, &data[NONCE_LEN..])
        .map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_pads_short_passwords_with_spaces() {
        let key = derive_key("abc");
        let mut expected = [b' '; KEY_LEN];
        expected[..3].copy_from_slice(b"abc");
        assert_eq!(key.0, expected);
    }

    #[test]
    fn derive_truncates_long_passwords() {
        let long = "x".repeat(64);
        let key = derive_key(&long);
        assert_eq!(key.0, [b'x'; KEY_LEN]);
    }

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(derive_key("hunter2").0, derive_key("hunter2").0);
        assert_ne!(derive_key("hunter2").0, derive_key("hunter3").0);
    }

    #[test]
    fn roundtrip() {
        let key = derive_key("secret");
        let message = b"Hello, World!";

        let ciphertext = encrypt(&key, message).unwrap();
        let plaintext = decrypt(&key, &ciphertext).unwrap();

        assert_eq!(plaintext, message);
    }

    #[test]
    fn roundtrip_empty_payload() {
        let key = derive_key("secret");
        let ciphertext = encrypt(&key, b"").unwrap();
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), b"");
    }

    #[test]
    fn roundtrip_large_payload() {
        let key = derive_key("secret");
        let message: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let ciphertext = encrypt(&key, &message).unwrap();
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), message);
    }

    #[test]
    fn wrong_key_fails() {
        let ciphertext = encrypt(&derive_key("right"), b"payload").unwrap();
        assert_eq!(
            decrypt(&derive_key("wrong"), &ciphertext),
            Err(CryptoError::Decrypt)
        );
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = derive_key("secret");
        let mut ciphertext = encrypt(&key, b"payload").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert_eq!(decrypt(&key, &ciphertext), Err(CryptoError::Decrypt));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let key = derive_key("secret");
        assert_eq!(decrypt(&key, &[0u8; 10]), Err(CryptoError::Decrypt));
    }
}
