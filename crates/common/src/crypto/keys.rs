use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{fill_random, CryptoError};

/// Size of an Ed25519 key (public or secret seed) in bytes
pub const SIGN_KEY_SIZE: usize = 32;
/// Size of an X25519 key (public or secret) in bytes
pub const DH_KEY_SIZE: usize = 32;

fn decode_fixed<const N: usize>(text: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| CryptoError::InvalidKey(format!("{what} base64 decode error: {e}")))?;
    if bytes.len() != N {
        return Err(CryptoError::InvalidKey(format!(
            "invalid {what} size, expected {N}, got {}",
            bytes.len()
        )));
    }
    let mut buff = [0u8; N];
    buff.copy_from_slice(&bytes);
    Ok(buff)
}

/// Public half of a signing keypair
///
/// Textual form is unpadded base64url, which doubles as the identity's
/// tracking key and as its lookup key in a directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignPublicKey(VerifyingKey);

impl SignPublicKey {
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = decode_fixed::<SIGN_KEY_SIZE>(text, "signing public key")?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn to_bytes(&self) -> [u8; SIGN_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Verify a detached Ed25519 signature over `msg`
    pub fn verify(&self, msg: &[u8], signature: &ed25519_dalek::Signature) -> Result<(), CryptoError> {
        self.0
            .verify_strict(msg, signature)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

impl fmt::Debug for SignPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignPublicKey({})", self.to_base64())
    }
}

impl fmt::Display for SignPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl TryFrom<String> for SignPublicKey {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl From<SignPublicKey> for String {
    fn from(key: SignPublicKey) -> Self {
        key.to_base64()
    }
}

/// Secret half of a signing keypair
///
/// Holds the 32-byte Ed25519 seed. Never printed.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignSecretKey(SigningKey);

impl SignSecretKey {
    /// Generate a new random signing key using the platform RNG
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; SIGN_KEY_SIZE];
        fill_random(&mut seed)?;
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self(key))
    }

    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let mut seed = decode_fixed::<SIGN_KEY_SIZE>(text, "signing secret key")?;
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.to_bytes())
    }

    pub fn public(&self) -> SignPublicKey {
        SignPublicKey(self.0.verifying_key())
    }

    /// Produce a detached Ed25519 signature over `msg`
    pub fn sign(&self, msg: &[u8]) -> ed25519_dalek::Signature {
        self.0.sign(msg)
    }
}

impl fmt::Debug for SignSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignSecretKey(..)")
    }
}

impl TryFrom<String> for SignSecretKey {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl From<SignSecretKey> for String {
    fn from(key: SignSecretKey) -> Self {
        key.to_base64()
    }
}

/// Public half of a key-agreement keypair
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DhPublicKey(X25519PublicKey);

impl DhPublicKey {
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = decode_fixed::<DH_KEY_SIZE>(text, "dh public key")?;
        Ok(Self(X25519PublicKey::from(bytes)))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }
}

impl fmt::Debug for DhPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DhPublicKey({})", self.to_base64())
    }
}

impl fmt::Display for DhPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl TryFrom<String> for DhPublicKey {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl From<DhPublicKey> for String {
    fn from(key: DhPublicKey) -> Self {
        key.to_base64()
    }
}

/// Secret half of a key-agreement keypair
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DhSecretKey(StaticSecret);

impl DhSecretKey {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; DH_KEY_SIZE];
        fill_random(&mut bytes)?;
        let key = StaticSecret::from(bytes);
        bytes.zeroize();
        Ok(Self(key))
    }

    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let mut bytes = decode_fixed::<DH_KEY_SIZE>(text, "dh secret key")?;
        let key = StaticSecret::from(bytes);
        bytes.zeroize();
        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.to_bytes())
    }

    pub fn public(&self) -> DhPublicKey {
        DhPublicKey(X25519PublicKey::from(&self.0))
    }
}

impl fmt::Debug for DhSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DhSecretKey(..)")
    }
}

impl TryFrom<String> for DhSecretKey {
    type Error = CryptoError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl From<DhSecretKey> for String {
    fn from(key: DhSecretKey) -> Self {
        key.to_base64()
    }
}

/// Output of a Diffie-Hellman exchange between two identities
///
/// Symmetric: `derive(a.priv, b.pub) == derive(b.priv, a.pub)`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; DH_KEY_SIZE]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Standard base64 rendering, used as the pepper of anti-tracking hashes
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// X25519 agreement of our secret with their public key
pub fn derive_shared_secret(mine: &DhSecretKey, theirs: &DhPublicKey) -> SharedSecret {
    SharedSecret(*mine.0.diffie_hellman(&theirs.0).as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sign_key_text_form() {
        let secret = SignSecretKey::generate().unwrap();
        let public = secret.public();

        let recovered = SignSecretKey::from_base64(&secret.to_base64()).unwrap();
        assert_eq!(recovered.public(), public);

        let text = public.to_base64();
        assert!(!text.contains('/'));
        assert_eq!(SignPublicKey::from_base64(&text).unwrap(), public);
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = SignSecretKey::generate().unwrap();
        let public = secret.public();
        let message = b"hello, world!";

        let signature = secret.sign(message);
        assert!(public.verify(message, &signature).is_ok());
        assert!(public.verify(b"hello, world?", &signature).is_err());

        let other = SignSecretKey::generate().unwrap().public();
        assert!(other.verify(message, &signature).is_err());
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        let a = DhSecretKey::generate().unwrap();
        let b = DhSecretKey::generate().unwrap();
        let c = DhSecretKey::generate().unwrap();

        let ab = derive_shared_secret(&a, &b.public());
        let ba = derive_shared_secret(&b, &a.public());
        assert_eq!(ab, ba);

        let ac = derive_shared_secret(&a, &c.public());
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(SignPublicKey::from_base64("AAAA").is_err());
        assert!(DhPublicKey::from_base64("not base64 at all!").is_err());
    }

    #[test]
    fn test_secret_keys_are_not_printed() {
        let secret = SignSecretKey::generate().unwrap();
        assert_eq!(format!("{:?}", secret), "SignSecretKey(..)");
    }
}
