//! Shared-secret authenticated encryption with a fresh key per message.
//!
//! Wire layout of every sealed message:
//! ```text
//! [salt:16][AES-256-GCM ciphertext][GCM tag:16]
//! ```
//!
//! # How the per-message key works (for beginners)
//!
//! Both ends know a long-lived *secret* (derived from a passphrase the user
//! typed).  The secret is never used as a cipher key directly.  Instead, for
//! every message the sender:
//!
//! 1. Draws 16 random bytes from the OS (the *salt*).
//! 2. Runs PBKDF2-HMAC-SHA256 over `(secret, salt)` with
//!    [`KDF_ITERATIONS`] rounds to get a 32-byte key.
//! 3. Seals the plaintext with AES-256-GCM under that key.  The first 12 salt
//!    bytes are the nonce and the whole salt is bound as associated data.
//!
//! The receiver splits the salt off the front, re-derives the same key from
//! its own copy of the secret, and opens the ciphertext.  Because every
//! message has its own key, replayed or reordered datagrams can never cause a
//! nonce to be reused under one key.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of the random salt prepended to every sealed message.
pub const SALT_LEN: usize = 16;

/// Length of the AES-GCM nonce taken from the front of the salt.
const NONCE_LEN: usize = 12;

/// Length of the derived AES-256 key.
const KEY_LEN: usize = 32;

/// Length of the GCM authentication tag appended to the ciphertext.
pub const TAG_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256 iteration count.  Part of the wire contract: both ends
/// must derive identical keys.
pub const KDF_ITERATIONS: u32 = 10_000;

/// Errors produced by [`Encryption::encrypt`] and [`Encryption::decrypt`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Input is shorter than the salt plus the authentication tag.
    #[error("sealed message truncated: need at least {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// Wrong key, corrupted ciphertext or forged tag.  Which check failed is
    /// not reported.
    #[error("decryption failed")]
    Decryption,

    /// The AEAD refused to seal the plaintext.
    #[error("encryption failed")]
    Encryption,
}

/// A configured shared secret.
///
/// Cloning is cheap enough for configuration purposes; the secret bytes are
/// wiped from memory when the last copy is dropped.
#[derive(Clone)]
pub struct Encryption {
    secret: Zeroizing<Vec<u8>>,
}

impl Encryption {
    /// Creates an encryption configuration from raw secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Creates an encryption configuration from a user-entered passphrase.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lanstream_core::Encryption;
    ///
    /// let enc = Encryption::from_passphrase("swordfish");
    /// let sealed = enc.encrypt(b"hello").unwrap();
    /// assert_eq!(enc.decrypt(&sealed).unwrap(), b"hello");
    /// ```
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(passphrase.as_bytes().to_vec())
    }

    /// Seals `plaintext` under a key derived from a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the AEAD rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let cipher = self.cipher_for(&salt);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&salt[..NONCE_LEN]),
                Payload {
                    msg: plaintext,
                    aad: &salt,
                },
            )
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = Vec::with_capacity(SALT_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Opens a message produced by [`encrypt`](Self::encrypt).
    ///
    /// Never returns partial plaintext: either the tag verifies and the whole
    /// message is returned, or the call fails.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Truncated`] when `sealed` cannot even hold a salt
    /// and tag, and [`CryptoError::Decryption`] for every other failure.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let needed = SALT_LEN + TAG_LEN;
        if sealed.len() < needed {
            return Err(CryptoError::Truncated {
                needed,
                available: sealed.len(),
            });
        }

        let (salt, ciphertext) = sealed.split_at(SALT_LEN);
        let cipher = self.cipher_for(salt);
        cipher
            .decrypt(
                Nonce::from_slice(&salt[..NONCE_LEN]),
                Payload {
                    msg: ciphertext,
                    aad: salt,
                },
            )
            .map_err(|_| CryptoError::Decryption)
    }

    fn cipher_for(&self, salt: &[u8]) -> Aes256Gcm {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.secret, salt, KDF_ITERATIONS, &mut *key);
        Aes256Gcm::new((&*key).into())
    }
}

impl fmt::Debug for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryption")
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_recovers_plaintext_with_same_secret() {
        // Arrange
        let enc = Encryption::from_passphrase("swordfish");

        // Act
        let sealed = enc.encrypt(b"the quick brown fox").unwrap();
        let opened = enc.decrypt(&sealed).unwrap();

        // Assert
        assert_eq!(opened, b"the quick brown fox");
    }

    #[test]
    fn test_decrypt_empty_plaintext_round_trips() {
        let enc = Encryption::from_passphrase("swordfish");
        let sealed = enc.encrypt(b"").unwrap();
        assert_eq!(sealed.len(), SALT_LEN + TAG_LEN);
        assert_eq!(enc.decrypt(&sealed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decrypt_with_different_secret_fails() {
        // Arrange
        let sender = Encryption::from_passphrase("swordfish");
        let receiver = Encryption::from_passphrase("marlin");

        // Act
        let sealed = sender.encrypt(b"secret audio metadata").unwrap();
        let result = receiver.decrypt(&sealed);

        // Assert
        assert_eq!(result, Err(CryptoError::Decryption));
    }

    #[test]
    fn test_encrypt_twice_yields_different_ciphertexts() {
        let enc = Encryption::from_passphrase("swordfish");
        let a = enc.encrypt(b"same plaintext").unwrap();
        let b = enc.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b, "salts must differ between calls");
        assert_ne!(a[..SALT_LEN], b[..SALT_LEN]);
    }

    #[test]
    fn test_sealed_layout_is_salt_then_ciphertext_and_tag() {
        let enc = Encryption::from_passphrase("swordfish");
        let sealed = enc.encrypt(&[7u8; 100]).unwrap();
        assert_eq!(sealed.len(), SALT_LEN + 100 + TAG_LEN);
    }

    #[test]
    fn test_decrypt_detects_flipped_ciphertext_bit() {
        // Arrange
        let enc = Encryption::from_passphrase("swordfish");
        let mut sealed = enc.encrypt(b"tamper with me").unwrap();

        // Act
        sealed[SALT_LEN + 3] ^= 0x01;

        // Assert
        assert_eq!(enc.decrypt(&sealed), Err(CryptoError::Decryption));
    }

    #[test]
    fn test_decrypt_detects_modified_salt() {
        let enc = Encryption::from_passphrase("swordfish");
        let mut sealed = enc.encrypt(b"salted").unwrap();
        sealed[0] ^= 0xFF;
        assert_eq!(enc.decrypt(&sealed), Err(CryptoError::Decryption));
    }

    #[test]
    fn test_decrypt_truncated_input_reports_truncation() {
        let enc = Encryption::from_passphrase("swordfish");
        let result = enc.decrypt(&[0u8; SALT_LEN - 1]);
        assert_eq!(
            result,
            Err(CryptoError::Truncated {
                needed: SALT_LEN + TAG_LEN,
                available: SALT_LEN - 1
            })
        );
    }

    #[test]
    fn test_decrypt_salt_only_input_reports_truncation() {
        let enc = Encryption::from_passphrase("swordfish");
        let result = enc.decrypt(&[0u8; SALT_LEN]);
        assert!(matches!(result, Err(CryptoError::Truncated { .. })));
    }

    #[test]
    fn test_debug_output_does_not_leak_secret() {
        let enc = Encryption::from_passphrase("swordfish");
        let rendered = format!("{enc:?}");
        assert!(!rendered.contains("swordfish"));
        assert!(rendered.contains("redacted"));
    }
}
