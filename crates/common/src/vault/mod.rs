//! Passphrase-sealed secret storage
//!
//! A vault keeps arbitrary named secrets (keypairs, random secrets, any JSON
//! value) in a single encrypted payload:
//!
//! ```json
//! { "salt": "<random>", "content": "SEA{...}" }
//! ```
//!
//! The content key is `work(passphrase, salt)`. There is no access control
//! beyond the passphrase; separate owners use separate vaults.

mod storage;

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, CryptoError, KeyPairSet};
use crate::graph::GraphError;

pub use storage::{FileVaultStore, GraphVaultStore, MemoryVaultStore, VaultStore};

const SALT_LEN: usize = 64;
const GENERATED_SECRET_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault is sealed")]
    Sealed,
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("malformed vault payload: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A stored secret with its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Milliseconds since the epoch
    pub created: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    pub revision: u32,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedPayload {
    salt: String,
    content: String,
}

/// A vault over a [`VaultStore`] backend
///
/// Starts sealed. `unlock` decrypts the stored payload (or starts an empty
/// vault when the backend holds nothing); `save` writes the current entries
/// back; `seal` saves and forgets the decrypted entries and passphrase.
#[derive(Debug)]
pub struct Vault<S> {
    store: S,
    salt: Option<String>,
    entries: Option<BTreeMap<String, VaultEntry>>,
    passphrase: Option<Zeroizing<String>>,
}

impl<S: VaultStore> Vault<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            salt: None,
            entries: None,
            passphrase: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decrypt the vault with `passphrase`
    ///
    /// An empty backend yields a new, empty vault sealed with this
    /// passphrase on the next save.
    pub async fn unlock(&mut self, passphrase: &str) -> Result<(), VaultError> {
        if self.entries.is_some() {
            return Ok(());
        }
        let entries = match self.store.read().await? {
            Some(payload) if !payload.trim().is_empty() => {
                let sealed: SealedPayload = serde_json::from_str(&payload)
                    .map_err(|e| VaultError::Malformed(e.to_string()))?;
                let proof = crypto::work(passphrase, &sealed.salt);
                let plaintext = Zeroizing::new(
                    crypto::decrypt(&sealed.content, proof.as_str())
                        .map_err(|_| VaultError::WrongPassphrase)?,
                );
                self.salt = Some(sealed.salt);
                serde_json::from_slice(&plaintext)?
            }
            _ => {
                tracing::debug!("initializing empty vault");
                BTreeMap::new()
            }
        };
        self.entries = Some(entries);
        self.passphrase = Some(Zeroizing::new(passphrase.to_string()));
        Ok(())
    }

    /// Encrypt the entries and write them to the backend
    pub async fn save(&mut self) -> Result<(), VaultError> {
        let entries = self.entries.as_ref().ok_or(VaultError::Sealed)?;
        let passphrase = self.passphrase.as_ref().ok_or(VaultError::Sealed)?;
        let salt = match &self.salt {
            Some(salt) => salt.clone(),
            None => crypto::random_string(SALT_LEN)?,
        };

        let plaintext = Zeroizing::new(serde_json::to_vec(entries)?);
        let proof = crypto::work(passphrase, &salt);
        let content = crypto::encrypt(&plaintext, proof.as_str())?.to_envelope_string()?;
        let payload = serde_json::to_string(&SealedPayload {
            salt: salt.clone(),
            content,
        })?;
        self.store.write(&payload).await?;
        self.salt = Some(salt);
        tracing::debug!(entries = entries.len(), "saved vault");
        Ok(())
    }

    /// Save, then drop the decrypted entries and the passphrase
    pub async fn seal(&mut self) -> Result<(), VaultError> {
        self.save().await?;
        self.entries = None;
        self.passphrase = None;
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.entries.is_some()
    }

    fn entries(&self) -> Result<&BTreeMap<String, VaultEntry>, VaultError> {
        self.entries.as_ref().ok_or(VaultError::Sealed)
    }

    fn entries_mut(&mut self) -> Result<&mut BTreeMap<String, VaultEntry>, VaultError> {
        self.entries.as_mut().ok_or(VaultError::Sealed)
    }

    /// All entries by id
    pub fn list(&self) -> Result<&BTreeMap<String, VaultEntry>, VaultError> {
        self.entries()
    }

    pub fn has(&self, id: &str) -> Result<bool, VaultError> {
        Ok(self.entries()?.contains_key(id))
    }

    pub fn get(&self, id: &str) -> Result<Option<&serde_json::Value>, VaultError> {
        Ok(self.entries()?.get(id).map(|entry| &entry.data))
    }

    pub fn get_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, VaultError> {
        match self.get(id)? {
            Some(data) => Ok(Some(serde_json::from_value(data.clone())?)),
            None => Ok(None),
        }
    }

    /// Store `data` under `id`, bumping the revision of an existing entry
    pub fn put<T: Serialize + ?Sized>(&mut self, id: &str, data: &T) -> Result<(), VaultError> {
        let data = serde_json::to_value(data)?;
        let now = now_millis();
        let entries = self.entries_mut()?;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.modified = Some(now);
                entry.revision += 1;
                entry.data = data;
            }
            None => {
                entries.insert(
                    id.to_string(),
                    VaultEntry {
                        created: now,
                        modified: None,
                        revision: 1,
                        data,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<bool, VaultError> {
        Ok(self.entries_mut()?.remove(id).is_some())
    }

    /// Generate a keypair and store it under `id`
    pub fn create_pair(&mut self, id: &str) -> Result<KeyPairSet, VaultError> {
        let pair = KeyPairSet::generate()?;
        self.put(id, &pair)?;
        Ok(pair)
    }

    pub fn get_pair(&self, id: &str) -> Result<Option<KeyPairSet>, VaultError> {
        self.get_as(id)
    }

    /// Generate a random secret string and store it under `id`
    pub fn create_secret(&mut self, id: &str) -> Result<String, VaultError> {
        let secret = crypto::random_string(GENERATED_SECRET_LEN)?;
        self.put(id, &secret)?;
        Ok(secret)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_empty_vault_unlocks() {
        let mut vault = Vault::new(MemoryVaultStore::new());
        assert!(!vault.is_unlocked());
        assert!(matches!(vault.has("x"), Err(VaultError::Sealed)));

        vault.unlock("passphrase").await.unwrap();
        assert!(vault.is_unlocked());
        assert!(vault.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seal_and_reopen() {
        let store = MemoryVaultStore::new();
        let mut vault = Vault::new(store.clone());
        vault.unlock("passphrase").await.unwrap();
        vault.put("token", "abc").unwrap();
        let pair = vault.create_pair("me").unwrap();
        vault.seal().await.unwrap();
        assert!(!vault.is_unlocked());

        let payload = store.read().await.unwrap().unwrap();
        assert!(!payload.contains("abc"));

        let mut reopened = Vault::new(store);
        reopened.unlock("passphrase").await.unwrap();
        assert_eq!(reopened.get_as::<String>("token").unwrap().unwrap(), "abc");
        let restored = reopened.get_pair("me").unwrap().unwrap();
        assert_eq!(restored.public_keys().unwrap(), pair.public_keys().unwrap());
    }

    #[tokio::test]
    async fn test_wrong_passphrase() {
        let store = MemoryVaultStore::new();
        let mut vault = Vault::new(store.clone());
        vault.unlock("right").await.unwrap();
        vault.put("k", &1).unwrap();
        vault.seal().await.unwrap();

        let mut other = Vault::new(store);
        assert!(matches!(other.unlock("wrong").await, Err(VaultError::WrongPassphrase)));
        assert!(!other.is_unlocked());
    }

    #[tokio::test]
    async fn test_put_tracks_revisions() {
        let mut vault = Vault::new(MemoryVaultStore::new());
        vault.unlock("p").await.unwrap();
        vault.put("k", &1).unwrap();
        vault.put("k", &2).unwrap();

        let entry = &vault.list().unwrap()["k"];
        assert_eq!(entry.revision, 2);
        assert!(entry.modified.is_some());
        assert_eq!(entry.data, serde_json::json!(2));

        assert!(vault.remove("k").unwrap());
        assert!(!vault.has("k").unwrap());
    }

    #[tokio::test]
    async fn test_create_secret() {
        let mut vault = Vault::new(MemoryVaultStore::new());
        vault.unlock("p").await.unwrap();
        let secret = vault.create_secret("s").unwrap();
        assert_eq!(secret.len(), GENERATED_SECRET_LEN);
        assert_eq!(vault.get_as::<String>("s").unwrap().unwrap(), secret);
    }
}
