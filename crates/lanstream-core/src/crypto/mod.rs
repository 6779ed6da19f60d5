//! Shared-secret cryptography: the per-message cipher and the verification token.

pub mod cipher;
pub mod verification;

pub use cipher::{CryptoError, Encryption, KDF_ITERATIONS, SALT_LEN, TAG_LEN};
pub use verification::{EncryptionVerification, VerificationError, MAGIC_PHRASE};
