//! Cryptographic primitives for the secure store family
//!
//! Everything here is a pure function over bytes, strings and key material.
//! Nothing in this module touches the graph.
//!
//! - **Signing**: Ed25519 keypairs authenticate every persisted envelope
//! - **Key agreement**: X25519 keypairs derive pairwise shared secrets
//! - **Symmetric encryption**: AES-256-GCM under an HKDF-derived per-message key
//! - **Asymmetric encryption**: RSA-OAEP (SHA-256) for small payloads
//! - **Work**: PBKDF2-HMAC-SHA256 for unlinkable member and content addresses
//!
//! # Security Model
//!
//! ## Envelopes
//! A symmetric envelope is serialized as `SEA{"ct":..,"iv":..,"s":..}`. A fresh
//! 12-byte IV and 9-byte salt are drawn for every call, and the AES key is
//! `HKDF-SHA256(key material, salt)`, so the same key material never encrypts
//! two messages under the same AES key and nonce.
//!
//! A signed message is serialized as `SEA{"m":..,"s":..}`. Stored values carry
//! an additional `@` prefix marking them as signed-and-encrypted.
//!
//! ## Work
//! `work()` is intentionally slow. Its parameters are constants: two parties
//! computing the address of the same member must agree bit for bit.

mod asymmetric;
mod key_pair;
mod keys;
mod secret;
mod signature;
mod work;

pub use asymmetric::{decrypt_with_priv, encrypt_with_pub, EncryptionPublicKey, EncryptionSecretKey};
pub use key_pair::{generate_key_pair, KeyPairOptions, KeyPairSet, PublicKeys};
pub use keys::{
    derive_shared_secret, DhPublicKey, DhSecretKey, SharedSecret, SignPublicKey, SignSecretKey,
    DH_KEY_SIZE, SIGN_KEY_SIZE,
};
pub use secret::{
    decrypt, decrypt_with, encrypt, DecryptOptions, KeyMaterial, Secret, SymmetricEnvelope,
    IV_SIZE, SALT_SIZE, SECRET_SIZE,
};
pub use signature::{sign, verify, SIGNED_PREFIX};
pub use work::{hash, random_bytes, random_string, work, WORK_ITERATIONS, WORK_KEY_SIZE};

/// Prefix shared by every serialized envelope
pub const ENVELOPE_PREFIX: &str = "SEA";

/// Errors raised by the primitive layer
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("decryption failed")]
    Decryption,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("missing key: {0}")]
    NoKey(&'static str),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("crypto error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Fill `buff` from the platform RNG
pub(crate) fn fill_random(buff: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buff).map_err(|e| CryptoError::KeyGeneration(e.to_string()))
}

/// Split a `SEA{...}` string into its JSON body
pub(crate) fn envelope_body(envelope: &str) -> Result<&str, CryptoError> {
    envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .filter(|body| body.starts_with('{'))
        .ok_or_else(|| CryptoError::MalformedEnvelope("missing SEA prefix".to_string()))
}
