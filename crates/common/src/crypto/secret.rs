//! Symmetric envelope encryption using AES-256-GCM
//!
//! An envelope never reuses an AES key: each call draws a fresh salt and
//! derives the key as `HKDF-SHA256(material, salt)`. The material itself is
//! either a group [`Secret`], a pairwise [`SharedSecret`], or a keypair's DH
//! secret component.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keys::{DhSecretKey, SharedSecret};
use super::{envelope_body, fill_random, CryptoError, KeyPairSet, ENVELOPE_PREFIX};

/// Size of the AES-GCM nonce in bytes
pub const IV_SIZE: usize = 12;
/// Size of the per-envelope KDF salt in bytes
pub const SALT_SIZE: usize = 9;
/// Size of a group secret and of derived AES keys in bytes
pub const SECRET_SIZE: usize = 32;

/// Anything that can key a symmetric envelope
pub trait KeyMaterial {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError>;
}

impl KeyMaterial for [u8] {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.to_vec())
    }
}

impl KeyMaterial for str {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.as_bytes().to_vec())
    }
}

impl KeyMaterial for String {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.as_bytes().to_vec())
    }
}

impl KeyMaterial for SharedSecret {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.as_bytes().to_vec())
    }
}

impl KeyMaterial for DhSecretKey {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.to_base64().into_bytes())
    }
}

impl KeyMaterial for KeyPairSet {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError> {
        self.dh_priv()?.key_material()
    }
}

/// A 256-bit group key
///
/// Generated once per shared store and handed to members inside their
/// encrypted member entry. Serialized as unpadded base64url.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Secret([u8; SECRET_SIZE]);

impl Secret {
    /// Generate a new random secret using the platform RNG
    pub fn generate() -> Result<Self, CryptoError> {
        let mut buff = [0; SECRET_SIZE];
        fill_random(&mut buff)?;
        Ok(Self(buff))
    }

    /// Create a secret from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() != SECRET_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )));
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(Self(buff))
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl KeyMaterial for Secret {
    fn key_material(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.0.to_vec())
    }
}

impl TryFrom<String> for Secret {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|e| CryptoError::InvalidKey(format!("secret base64 decode error: {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl From<Secret> for String {
    fn from(secret: Secret) -> Self {
        URL_SAFE_NO_PAD.encode(secret.bytes())
    }
}

/// Serialized form of a symmetric ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricEnvelope {
    pub ct: String,
    pub iv: String,
    pub s: String,
}

impl SymmetricEnvelope {
    /// Render as `SEA{"ct":..,"iv":..,"s":..}`
    pub fn to_envelope_string(&self) -> Result<String, CryptoError> {
        let body = serde_json::to_string(self).map_err(anyhow::Error::from)?;
        Ok(format!("{ENVELOPE_PREFIX}{body}"))
    }

    pub fn parse(envelope: &str) -> Result<Self, CryptoError> {
        let body = envelope_body(envelope)?;
        serde_json::from_str(body).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }
}

/// Decoding choices for [`decrypt_with`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DecryptOptions {
    /// Retry once reading the envelope fields as raw UTF-8 instead of base64.
    ///
    /// Only for data written by old writers. Never enable this for a value
    /// whose signature has already been verified.
    pub legacy_fallback: bool,
}

#[derive(Clone, Copy)]
enum FieldEncoding {
    Base64,
    Utf8,
}

impl FieldEncoding {
    fn decode(self, field: &str) -> Result<Vec<u8>, CryptoError> {
        match self {
            FieldEncoding::Base64 => STANDARD
                .decode(field)
                .map_err(|e| CryptoError::MalformedEnvelope(e.to_string())),
            FieldEncoding::Utf8 => Ok(field.as_bytes().to_vec()),
        }
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct AesKey([u8; SECRET_SIZE]);

fn derive_aes_key(material: &[u8], salt: &[u8]) -> Result<AesKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), material);
    let mut okm = [0u8; SECRET_SIZE];
    hk.expand(&[], &mut okm)
        .map_err(|_| anyhow::anyhow!("hkdf output length rejected"))?;
    Ok(AesKey(okm))
}

/// Encrypt `plaintext` under `key`
///
/// The IV and salt are fresh random values on every call, so encrypting the
/// same plaintext twice yields different envelopes.
pub fn encrypt<K>(plaintext: &[u8], key: &K) -> Result<SymmetricEnvelope, CryptoError>
where
    K: KeyMaterial + ?Sized,
{
    let mut material = key.key_material()?;
    let mut salt = [0u8; SALT_SIZE];
    let mut iv = [0u8; IV_SIZE];
    fill_random(&mut salt)?;
    fill_random(&mut iv)?;

    let aes_key = derive_aes_key(&material, &salt)?;
    material.zeroize();
    let cipher = Aes256Gcm::new_from_slice(&aes_key.0)
        .map_err(|_| anyhow::anyhow!("invalid aes key length"))?;
    let ct = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| anyhow::anyhow!("encrypt error"))?;

    Ok(SymmetricEnvelope {
        ct: STANDARD.encode(ct),
        iv: STANDARD.encode(iv),
        s: STANDARD.encode(salt),
    })
}

/// Decrypt a `SEA{...}` envelope string
pub fn decrypt<K>(envelope: &str, key: &K) -> Result<Vec<u8>, CryptoError>
where
    K: KeyMaterial + ?Sized,
{
    decrypt_with(envelope, key, DecryptOptions::default())
}

/// Decrypt with explicit decoding options
pub fn decrypt_with<K>(envelope: &str, key: &K, opts: DecryptOptions) -> Result<Vec<u8>, CryptoError>
where
    K: KeyMaterial + ?Sized,
{
    let parsed = SymmetricEnvelope::parse(envelope)?;
    let mut material = key.key_material()?;
    let result = match open(&parsed, &material, FieldEncoding::Base64) {
        Ok(plaintext) => Ok(plaintext),
        Err(_) if opts.legacy_fallback => {
            tracing::debug!("retrying decryption with legacy field encoding");
            open(&parsed, &material, FieldEncoding::Utf8)
        }
        Err(e) => Err(e),
    };
    material.zeroize();
    result
}

fn open(
    envelope: &SymmetricEnvelope,
    material: &[u8],
    encoding: FieldEncoding,
) -> Result<Vec<u8>, CryptoError> {
    let ct = encoding.decode(&envelope.ct)?;
    let iv = encoding.decode(&envelope.iv)?;
    let salt = encoding.decode(&envelope.s)?;
    if iv.len() != IV_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "invalid iv size, expected {IV_SIZE}, got {}",
            iv.len()
        )));
    }

    let aes_key = derive_aes_key(material, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&aes_key.0)
        .map_err(|_| anyhow::anyhow!("invalid aes key length"))?;
    cipher
        .decrypt(Nonce::from_slice(&iv), ct.as_ref())
        .map_err(|_| CryptoError::Decryption)
}
