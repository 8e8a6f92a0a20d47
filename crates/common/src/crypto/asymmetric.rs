//! RSA-OAEP for small payloads
//!
//! Only used to wrap short values (keys, tokens) for a recipient whose
//! encryption key is known. Bulk data always goes through the symmetric
//! envelope.

use std::fmt;

use aes_gcm::aead::OsRng;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize, Serializer};
use sha2::Sha256;

use super::CryptoError;

/// Modulus size used when none is requested
pub const DEFAULT_ENCRYPTION_BITS: usize = 4096;

/// RSA public key, serialized as base64 SPKI DER
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct EncryptionPublicKey(RsaPublicKey);

impl EncryptionPublicKey {
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let der = STANDARD
            .decode(text)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        RsaPublicKey::from_public_key_der(&der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn to_base64(&self) -> Result<String, CryptoError> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }
}

impl fmt::Debug for EncryptionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionPublicKey(..)")
    }
}

impl TryFrom<String> for EncryptionPublicKey {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl Serialize for EncryptionPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.to_base64().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

/// RSA private key, serialized as base64 PKCS#8 DER
#[derive(Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct EncryptionSecretKey(RsaPrivateKey);

impl EncryptionSecretKey {
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        RsaPrivateKey::new(&mut OsRng, bits)
            .map(Self)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))
    }

    pub fn public(&self) -> EncryptionPublicKey {
        EncryptionPublicKey(self.0.to_public_key())
    }

    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let der = STANDARD
            .decode(text)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        RsaPrivateKey::from_pkcs8_der(&der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn to_base64(&self) -> Result<String, CryptoError> {
        let der = self
            .0
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }
}

impl fmt::Debug for EncryptionSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionSecretKey(..)")
    }
}

impl TryFrom<String> for EncryptionSecretKey {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl Serialize for EncryptionSecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.to_base64().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

/// Encrypt a short payload for the holder of `key`
///
/// Output is standard base64.
pub fn encrypt_with_pub(data: &[u8], key: &EncryptionPublicKey) -> Result<String, CryptoError> {
    let ct = key
        .0
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| anyhow::anyhow!("rsa encrypt error: {e}"))?;
    Ok(STANDARD.encode(ct))
}

pub fn decrypt_with_priv(data: &str, key: &EncryptionSecretKey) -> Result<Vec<u8>, CryptoError> {
    let ct = STANDARD
        .decode(data)
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
    key.0
        .decrypt(Oaep::new::<Sha256>(), &ct)
        .map_err(|_| CryptoError::Decryption)
}
