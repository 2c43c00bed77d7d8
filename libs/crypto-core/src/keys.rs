//! Key generation, wrapping, and per-user wrap-key derivation.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{aead, CryptoError, Result};

/// A 32-byte symmetric key that is wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Generate a random 256-bit key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Wrap (encrypt) a key under another key. The result is a standard sealed
/// package and carries its own nonce and auth tag.
pub fn wrap_key(wrapping_key: &[u8; 32], key: &SecretKey) -> Result<Vec<u8>> {
    aead::seal_package(wrapping_key, key.as_bytes())
}

/// Unwrap a key previously wrapped with [`wrap_key`].
pub fn unwrap_key(wrapping_key: &[u8; 32], wrapped: &[u8]) -> Result<SecretKey> {
    let mut plain = aead::open_package(wrapping_key, wrapped)?;
    if plain.len() != 32 {
        plain.zeroize();
        return Err(CryptoError::InvalidKeyLength);
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&plain);
    plain.zeroize();
    Ok(SecretKey::from_bytes(bytes))
}

// Fixed Argon2id cost parameters. Derivation must be deterministic across
// releases or existing member grants become unreadable.
const ARGON2_MEM_KIB: u32 = 19_456;
const ARGON2_ITERATIONS: u32 = 2;
const ARGON2_LANES: u32 = 1;

/// Derive the wrapping key used to protect a member's copy of a group key.
///
/// Seeded from the master key (as the password input) and the user id (as
/// the salt), so the same user always derives the same wrap key and no
/// per-user secret has to be stored.
pub fn derive_user_wrap_key(master_key: &[u8; 32], user_id: &[u8]) -> Result<SecretKey> {
    let params = Params::new(ARGON2_MEM_KIB, ARGON2_ITERATIONS, ARGON2_LANES, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    // Argon2 requires an 8..=64 byte salt; hash the user id down to 16.
    let digest = Sha256::digest(user_id);
    let salt = &digest[..16];

    let mut out = [0u8; 32];
    argon2
        .hash_password_into(master_key, salt, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SecretKey::from_bytes(out))
}
