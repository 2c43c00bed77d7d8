//! AES-256-GCM sealed packages.
//!
//! Wire layout: `nonce(12) ‖ tag(16) ‖ ciphertext`. The tag sits before the
//! ciphertext so truncated payloads fail the length check instead of
//! producing a short ciphertext with a garbage tag.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::{CryptoError, Result};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn seal_package(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the tag to the ciphertext; split it back out to match
    // the package layout.
    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut package = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
    package.extend_from_slice(&nonce_bytes);
    package.extend_from_slice(tag);
    package.extend_from_slice(ciphertext);
    Ok(package)
}

/// Authenticate and decrypt a package produced by [`seal_package`].
pub fn open_package(key: &[u8; 32], package: &[u8]) -> Result<Vec<u8>> {
    if package.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidPackage);
    }

    let (nonce_bytes, rest) = package.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = cipher(key)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed.as_slice())
        .map_err(|_| CryptoError::Decryption)
}
