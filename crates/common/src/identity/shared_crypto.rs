use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Identity, IdentityError};
use crate::crypto::{self, PublicKeys, SharedSecret, SignPublicKey, SIGNED_PREFIX};

/// Pairwise operations between a full identity and a peer's public keys
///
/// Implementors provide the two primitive capabilities (key agreement and
/// signing); everything else is derived from them.
pub trait SharedCryptoCapability {
    fn derive_secret(&self, peer: &PublicKeys) -> Result<SharedSecret, IdentityError>;

    fn sign_payload(&self, payload: &str) -> Result<String, IdentityError>;

    /// Anti-tracking address for a member entry
    ///
    /// `"@" + work(tracking_key + "|" + pepper, salt)` where the pepper is the
    /// DH secret shared with `peer`. Only the two parties of the exchange can
    /// compute it, so observers cannot match entries to public keys.
    fn shared_id_hash_with(
        &self,
        tracking_key: &str,
        peer: &PublicKeys,
        salt: &str,
    ) -> Result<String, IdentityError> {
        let pepper = self.derive_secret(peer)?.to_base64();
        let hashed = crypto::work(&format!("{tracking_key}|{pepper}"), salt);
        Ok(format!("{SIGNED_PREFIX}{}", hashed.trim_end_matches('=')))
    }

    /// Encrypt `payload` for `peer` and sign the ciphertext
    fn shared_encrypt_and_sign<T>(&self, peer: &PublicKeys, payload: &T) -> Result<String, IdentityError>
    where
        T: Serialize + ?Sized,
    {
        let secret = self.derive_secret(peer)?;
        let plaintext = serde_json::to_vec(payload)?;
        let encrypted = crypto::encrypt(&plaintext, &secret)?.to_envelope_string()?;
        let signed = self.sign_payload(&encrypted)?;
        Ok(format!("{SIGNED_PREFIX}{signed}"))
    }

    /// Verify `envelope` against `signer`, then decrypt it with the secret
    /// shared with `peer`
    ///
    /// The signature is always checked before any decryption is attempted.
    fn shared_verify_and_decrypt<T>(
        &self,
        signer: &SignPublicKey,
        peer: &PublicKeys,
        envelope: &str,
    ) -> Result<T, IdentityError>
    where
        T: DeserializeOwned,
    {
        let ciphertext = crypto::verify(envelope, signer).map_err(|e| {
            tracing::debug!("envelope signature rejected: {e}");
            IdentityError::CantDecrypt
        })?;
        let secret = self.derive_secret(peer)?;
        let plaintext = crypto::decrypt(&ciphertext, &secret).map_err(|e| {
            tracing::debug!("envelope decryption failed: {e}");
            IdentityError::CantDecrypt
        })?;
        serde_json::from_slice(&plaintext).map_err(|_| IdentityError::CantDecrypt)
    }
}

impl SharedCryptoCapability for Identity {
    fn derive_secret(&self, peer: &PublicKeys) -> Result<SharedSecret, IdentityError> {
        self.shared_secret(peer)
    }

    fn sign_payload(&self, payload: &str) -> Result<String, IdentityError> {
        self.sign(payload)
    }
}

#[cfg(test)]
mod test {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[test]
    fn test_id_hash_agrees_across_parties() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let c = Identity::generate().unwrap();
        let key = b.sign_pub().to_base64();

        let from_a = a.shared_id_hash_with(&key, b.public_keys(), "salt").unwrap();
        let from_b = b.shared_id_hash_with(&key, a.public_keys(), "salt").unwrap();
        assert_eq!(from_a, from_b);
        assert!(from_a.starts_with('@'));
        assert!(!from_a.contains(&key));

        let from_c = c.shared_id_hash_with(&key, b.public_keys(), "salt").unwrap();
        assert_ne!(from_a, from_c);

        // a store with another salt yields an unrelated address for the same pair
        let resalted = a.shared_id_hash_with(&key, b.public_keys(), "pepper").unwrap();
        assert_ne!(from_a, resalted);
        assert_eq!(
            resalted,
            b.shared_id_hash_with(&key, a.public_keys(), "pepper").unwrap()
        );
        let other_c = c.shared_id_hash_with(&key, b.public_keys(), "pepper").unwrap();
        assert_ne!(resalted, other_c);
        assert_ne!(from_c, other_c);
    }

    #[test]
    fn test_encrypt_and_sign_round_trip() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let note = Note {
            text: "for b".into(),
        };

        let envelope = a.shared_encrypt_and_sign(b.public_keys(), &note).unwrap();
        assert!(envelope.starts_with("@SEA{"));

        let opened: Note = b
            .shared_verify_and_decrypt(a.sign_pub(), a.public_keys(), &envelope)
            .unwrap();
        assert_eq!(opened, note);
    }

    #[test]
    fn test_wrong_signer_is_rejected_before_decrypt() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let mallory = Identity::generate().unwrap();

        let envelope = a.shared_encrypt_and_sign(b.public_keys(), &"secret").unwrap();
        let result: Result<String, _> =
            b.shared_verify_and_decrypt(mallory.sign_pub(), a.public_keys(), &envelope);
        assert!(matches!(result, Err(IdentityError::CantDecrypt)));
    }

    #[test]
    fn test_third_party_cannot_decrypt() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        let c = Identity::generate().unwrap();

        let envelope = a.shared_encrypt_and_sign(b.public_keys(), &"secret").unwrap();
        let result: Result<String, _> =
            c.shared_verify_and_decrypt(a.sign_pub(), a.public_keys(), &envelope);
        assert!(matches!(result, Err(IdentityError::CantDecrypt)));
    }
}
