use serde::{Deserialize, Serialize};

use super::asymmetric::{EncryptionPublicKey, EncryptionSecretKey, DEFAULT_ENCRYPTION_BITS};
use super::keys::{DhPublicKey, DhSecretKey, SignPublicKey, SignSecretKey};
use super::CryptoError;

/// Which sub-keys [`generate_key_pair`] should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPairOptions {
    pub signing: bool,
    pub dh: bool,
    pub encryption: bool,
    /// RSA modulus size, only read when `encryption` is set
    pub encryption_bits: usize,
}

impl Default for KeyPairOptions {
    fn default() -> Self {
        Self {
            signing: true,
            dh: true,
            encryption: false,
            encryption_bits: DEFAULT_ENCRYPTION_BITS,
        }
    }
}

impl KeyPairOptions {
    pub fn with_encryption(mut self, bits: usize) -> Self {
        self.encryption = true;
        self.encryption_bits = bits;
        self
    }
}

/// The public keys that identify a party in stored metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeys {
    pub sign_pub: SignPublicKey,
    pub dh_pub: DhPublicKey,
}

/// A bundle of signing, key-agreement and (optionally) encryption keys
///
/// A set is *full* when its private components are present and *partial*
/// when only the public ones are. Serialized as camelCase JSON with every
/// key in text form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_pub: Option<SignPublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_priv: Option<SignSecretKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dh_pub: Option<DhPublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dh_priv: Option<DhSecretKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enc_pub: Option<EncryptionPublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enc_priv: Option<EncryptionSecretKey>,
}

/// Generate a fresh key set
pub fn generate_key_pair(opts: KeyPairOptions) -> Result<KeyPairSet, CryptoError> {
    let mut set = KeyPairSet::default();
    if opts.signing {
        let secret = SignSecretKey::generate()?;
        set.sign_pub = Some(secret.public());
        set.sign_priv = Some(secret);
    }
    if opts.dh {
        let secret = DhSecretKey::generate()?;
        set.dh_pub = Some(secret.public());
        set.dh_priv = Some(secret);
    }
    if opts.encryption {
        let secret = EncryptionSecretKey::generate(opts.encryption_bits)?;
        set.enc_pub = Some(secret.public());
        set.enc_priv = Some(secret);
    }
    Ok(set)
}

impl KeyPairSet {
    /// Signing and DH keys, no encryption keys
    pub fn generate() -> Result<Self, CryptoError> {
        generate_key_pair(KeyPairOptions::default())
    }

    /// A partial set carrying only the given public keys
    pub fn from_public(keys: PublicKeys) -> Self {
        Self {
            sign_pub: Some(keys.sign_pub),
            dh_pub: Some(keys.dh_pub),
            ..Default::default()
        }
    }

    pub fn sign_pub(&self) -> Result<&SignPublicKey, CryptoError> {
        self.sign_pub.as_ref().ok_or(CryptoError::NoKey("signPub"))
    }

    pub fn sign_priv(&self) -> Result<&SignSecretKey, CryptoError> {
        self.sign_priv.as_ref().ok_or(CryptoError::NoKey("signPriv"))
    }

    pub fn dh_pub(&self) -> Result<&DhPublicKey, CryptoError> {
        self.dh_pub.as_ref().ok_or(CryptoError::NoKey("dhPub"))
    }

    pub fn dh_priv(&self) -> Result<&DhSecretKey, CryptoError> {
        self.dh_priv.as_ref().ok_or(CryptoError::NoKey("dhPriv"))
    }

    pub fn enc_pub(&self) -> Result<&EncryptionPublicKey, CryptoError> {
        self.enc_pub.as_ref().ok_or(CryptoError::NoKey("encPub"))
    }

    pub fn enc_priv(&self) -> Result<&EncryptionSecretKey, CryptoError> {
        self.enc_priv.as_ref().ok_or(CryptoError::NoKey("encPriv"))
    }

    pub fn public_keys(&self) -> Result<PublicKeys, CryptoError> {
        Ok(PublicKeys {
            sign_pub: *self.sign_pub()?,
            dh_pub: *self.dh_pub()?,
        })
    }

    /// True when no private component is present
    pub fn is_partial(&self) -> bool {
        self.sign_priv.is_none() && self.dh_priv.is_none() && self.enc_priv.is_none()
    }

    /// Copy of this set with every private component removed
    pub fn to_public(&self) -> Self {
        Self {
            sign_pub: self.sign_pub,
            dh_pub: self.dh_pub,
            enc_pub: self.enc_pub.clone(),
            ..Default::default()
        }
    }

    /// Check that every present private key matches its public key
    pub fn validate(&self) -> Result<(), CryptoError> {
        if let (Some(secret), Some(public)) = (&self.sign_priv, &self.sign_pub) {
            if secret.public() != *public {
                return Err(CryptoError::InvalidKey("signing keys do not match".into()));
            }
        }
        if let (Some(secret), Some(public)) = (&self.dh_priv, &self.dh_pub) {
            if secret.public() != *public {
                return Err(CryptoError::InvalidKey("dh keys do not match".into()));
            }
        }
        Ok(())
    }
}
