//! Shared cryptographic primitives for the chat backend.
//!
//! Everything here operates on raw bytes; key storage, caching and policy
//! live in the service layer.

mod aead;
mod keys;

pub use aead::{open_package, seal_package, NONCE_LEN, TAG_LEN};
pub use keys::{derive_user_wrap_key, generate_key, unwrap_key, wrap_key, SecretKey};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed")]
    Decryption,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("malformed ciphertext package")]
    InvalidPackage,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
