//! Identities and the pairwise operations built on them
//!
//! An [`Identity`] owns one [`KeyPairSet`]. A full identity (private keys
//! present) can sign, derive shared secrets and open envelopes addressed to
//! it. A public-only identity is a reference to someone else and can only be
//! used as the peer side of those operations.

mod directory;
mod shared_crypto;

use std::fmt;

use crate::crypto::{self, CryptoError, KeyPairSet, PublicKeys, SharedSecret, SignPublicKey};

pub use directory::{IdentityDirectory, MemoryIdentityDirectory};
pub use shared_crypto::SharedCryptoCapability;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity has no permission for this operation")]
    NoPermission,
    #[error("could not verify or decrypt envelope")]
    CantDecrypt,
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A keypair holder, optionally named
#[derive(Clone)]
pub struct Identity {
    keys: KeyPairSet,
    public: PublicKeys,
    alias: Option<String>,
}

impl Identity {
    /// Fresh identity with new signing and DH keys
    pub fn generate() -> Result<Self, IdentityError> {
        Self::from_keys(KeyPairSet::generate()?)
    }

    /// Wrap an existing key set, which must at least carry both public keys
    pub fn from_keys(keys: KeyPairSet) -> Result<Self, IdentityError> {
        keys.validate()?;
        let public = keys.public_keys()?;
        Ok(Self {
            keys,
            public,
            alias: None,
        })
    }

    /// A public-only reference to another party
    pub fn from_public(public: PublicKeys) -> Self {
        Self {
            keys: KeyPairSet::from_public(public),
            public,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Display name, falling back to the signing key's text form
    pub fn alias(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.public.sign_pub.to_base64())
    }

    /// The explicit alias, if one was given
    pub fn name(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn keys(&self) -> &KeyPairSet {
        &self.keys
    }

    pub fn public_keys(&self) -> &PublicKeys {
        &self.public
    }

    pub fn sign_pub(&self) -> &SignPublicKey {
        &self.public.sign_pub
    }

    /// True when this identity holds no private keys
    pub fn is_public_only(&self) -> bool {
        self.keys.is_partial()
    }

    /// Whether `keys` designate this identity
    pub fn is(&self, keys: &PublicKeys) -> bool {
        self.public == *keys
    }

    /// Diffie-Hellman with the peer's DH public key
    pub fn shared_secret(&self, peer: &PublicKeys) -> Result<SharedSecret, IdentityError> {
        let mine = self
            .keys
            .dh_priv()
            .map_err(|_| IdentityError::NoPermission)?;
        Ok(crypto::derive_shared_secret(mine, &peer.dh_pub))
    }

    pub fn sign(&self, payload: &str) -> Result<String, IdentityError> {
        let key = self
            .keys
            .sign_priv()
            .map_err(|_| IdentityError::NoPermission)?;
        Ok(crypto::sign(payload, key)?)
    }

    /// Verify something this identity signed
    pub fn verify(&self, signed: &str) -> Result<String, IdentityError> {
        Ok(crypto::verify(signed, &self.public.sign_pub)?)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("alias", &self.alias)
            .field("sign_pub", &self.public.sign_pub)
            .field("public_only", &self.is_public_only())
            .finish()
    }
}

impl From<&Identity> for PublicKeys {
    fn from(identity: &Identity) -> Self {
        identity.public
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shared_secret_symmetry() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        assert_eq!(
            a.shared_secret(b.public_keys()).unwrap(),
            b.shared_secret(a.public_keys()).unwrap()
        );
    }

    #[test]
    fn test_public_only_cannot_derive() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let reference = Identity::from_public(*b.public_keys());
        assert!(reference.is_public_only());
        assert!(matches!(
            reference.shared_secret(a.public_keys()),
            Err(IdentityError::NoPermission)
        ));
        assert!(matches!(
            reference.sign("x"),
            Err(IdentityError::NoPermission)
        ));
    }

    #[test]
    fn test_sign_verify() {
        let a = Identity::generate().unwrap().with_alias("alice");
        assert_eq!(a.alias(), "alice");
        let signed = a.sign("hello").unwrap();
        assert_eq!(a.verify(&signed).unwrap(), "hello");

        let b = Identity::generate().unwrap();
        assert!(b.verify(&signed).is_err());
    }

    #[test]
    fn test_from_keys_rejects_mismatched_set() {
        let a = KeyPairSet::generate().unwrap();
        let b = KeyPairSet::generate().unwrap();
        let mut value = serde_json::to_value(&a).unwrap();
        value["signPub"] = serde_json::to_value(b.sign_pub().unwrap()).unwrap();
        let mixed: KeyPairSet = serde_json::from_value(value).unwrap();
        assert!(Identity::from_keys(mixed).is_err());
    }
}
