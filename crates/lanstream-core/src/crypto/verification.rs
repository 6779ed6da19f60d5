//! Encryption verification token.
//!
//! A server publishes a token in every search response: the well-known
//! [`MAGIC_PHRASE`] sealed under the server's secret, or the bare phrase when
//! the server runs without encryption.  A listener tests its own secret by
//! trying to open the token.  No round trip and no key exchange is needed.

use thiserror::Error;

use super::cipher::{CryptoError, Encryption};

/// Plaintext sealed into every verification token.
pub const MAGIC_PHRASE: &[u8] = b"LanStream encryption verification";

/// Why a deliberate [`EncryptionVerification::verify`] call failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// The token is plaintext but the caller has a secret configured, or the
    /// token is sealed but the caller has none.
    #[error("encryption mismatch: token {token} but local side {local}")]
    Mismatch {
        token: &'static str,
        local: &'static str,
    },

    /// The token is sealed and the local secret could not open it.
    #[error("verification token did not decrypt: {0}")]
    Decryption(#[from] CryptoError),

    /// The token opened but did not contain the magic phrase.
    #[error("verification token decrypted to an unexpected phrase")]
    WrongPhrase,
}

/// Token used to check secret compatibility without talking to the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptionVerification {
    token: Vec<u8>,
}

impl EncryptionVerification {
    /// Builds a token for the given encryption configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if sealing the phrase fails.
    pub fn new(encryption: Option<&Encryption>) -> Result<Self, CryptoError> {
        let token = match encryption {
            Some(enc) => enc.encrypt(MAGIC_PHRASE)?,
            None => MAGIC_PHRASE.to_vec(),
        };
        Ok(Self { token })
    }

    /// Wraps raw token bytes received from the wire.
    pub fn from_bytes(token: Vec<u8>) -> Self {
        Self { token }
    }

    /// Raw token bytes, as written to the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.token
    }

    /// `true` when the token was produced without encryption.
    pub fn is_plaintext(&self) -> bool {
        self.token == MAGIC_PHRASE
    }

    /// Filter-path check: would `encryption` let us talk to the token's owner?
    ///
    /// Never errors; a token that fails to open simply does not match.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lanstream_core::{Encryption, EncryptionVerification};
    ///
    /// let server = Encryption::from_passphrase("swordfish");
    /// let token = EncryptionVerification::new(Some(&server)).unwrap();
    ///
    /// assert!(token.matches_encryption(Some(&Encryption::from_passphrase("swordfish"))));
    /// assert!(!token.matches_encryption(Some(&Encryption::from_passphrase("marlin"))));
    /// assert!(!token.matches_encryption(None));
    /// ```
    pub fn matches_encryption(&self, encryption: Option<&Encryption>) -> bool {
        self.verify(encryption).is_ok()
    }

    /// Deliberate check path: like [`matches_encryption`](Self::matches_encryption)
    /// but reports why the token does not match.
    ///
    /// # Errors
    ///
    /// Returns a [`VerificationError`] describing the mismatch.
    pub fn verify(&self, encryption: Option<&Encryption>) -> Result<(), VerificationError> {
        match (encryption, self.is_plaintext()) {
            (None, true) => Ok(()),
            (None, false) => Err(VerificationError::Mismatch {
                token: "is encrypted",
                local: "has no secret",
            }),
            (Some(_), true) => Err(VerificationError::Mismatch {
                token: "is plaintext",
                local: "has a secret",
            }),
            (Some(enc), false) => {
                let opened = enc.decrypt(&self.token)?;
                if opened == MAGIC_PHRASE {
                    Ok(())
                } else {
                    Err(VerificationError::WrongPhrase)
                }
            }
        }
    }
}
