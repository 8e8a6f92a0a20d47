use serde::de::DeserializeOwned;
use serde::Serialize;

use super::meta::paths;
use super::{Context, Invitee, MemberEntry, SecureStore, StoreError, StoreMeta, StoreState};
use crate::crypto::{self, PublicKeys};
use crate::graph::Location;
use crate::identity::{Identity, SharedCryptoCapability};

const SALT_LEN: usize = 24;

/// A store with one fixed owner and any number of correspondents
///
/// There is no group key: every exchange is pairwise between the owner and
/// one correspondent. Member entries only record who was invited, which lets
/// the owner restrict a service to known correspondents.
#[derive(Debug, Clone)]
pub struct TwinStore {
    base: SecureStore,
    meta: Option<StoreMeta>,
}

impl TwinStore {
    pub fn new(ctx: Context) -> Self {
        Self {
            base: SecureStore::new(ctx),
            meta: None,
        }
    }

    pub fn at(ctx: Context, location: Location) -> Self {
        Self {
            base: SecureStore::at(ctx, location),
            meta: None,
        }
    }

    pub fn bind(&mut self, location: Location) {
        self.base.bind(location);
        self.meta = None;
    }

    pub fn signon(&mut self, identity: Option<Identity>) -> Result<&Identity, StoreError> {
        self.base.signon(identity)
    }

    pub fn base(&self) -> &SecureStore {
        &self.base
    }

    pub fn context(&self) -> &Context {
        self.base.context()
    }

    pub fn location(&self) -> Result<&Location, StoreError> {
        self.base.location()
    }

    pub fn identity(&self) -> Result<&Identity, StoreError> {
        self.base.identity()
    }

    pub fn state(&self) -> StoreState {
        self.base.state()
    }

    pub async fn exists(&self) -> Result<bool, StoreError> {
        self.base.exists().await
    }

    /// Create the store with the signed-on identity as its owner
    pub async fn create(&mut self) -> Result<(), StoreError> {
        let location = self.base.location()?.clone();
        let identity = self.base.identity()?.clone();
        if self.meta.is_some() || self.base.is().await? {
            return Err(StoreError::StoreExists);
        }

        let meta = StoreMeta {
            owner: *identity.public_keys(),
            write: None,
            salt: crypto::random_string(SALT_LEN)?,
            ghost: None,
            only_members: false,
        };
        meta.save(self.base.graph(), &location).await?;
        tracing::debug!(%location, owner = %identity.alias(), "created two-party store");

        self.meta = Some(meta);
        self.base.set_state(StoreState::Created);
        self.base.set_state(StoreState::Established);
        Ok(())
    }

    /// Attach to an existing store as a correspondent
    ///
    /// No identity is needed to join; it is only needed to prove membership.
    pub async fn join(&mut self, identity: Option<Identity>) -> Result<(), StoreError> {
        if let Some(identity) = identity {
            self.base.signon(Some(identity))?;
        }
        self.restore_meta().await?;
        self.base.set_state(StoreState::Joined);
        self.base.set_state(StoreState::Established);
        Ok(())
    }

    /// Unlock as the owner
    pub async fn unlock(&mut self) -> Result<(), StoreError> {
        let identity = self.base.identity()?.clone();
        let meta = self.restore_meta().await?;
        if !identity.is(&meta.owner) {
            return Err(StoreError::NoPermission);
        }
        self.base.set_state(StoreState::Unlocked);
        self.base.set_state(StoreState::Established);
        Ok(())
    }

    pub fn meta(&self) -> Result<&StoreMeta, StoreError> {
        self.meta.as_ref().ok_or(StoreError::StoreExistsNot)
    }

    /// Cached metadata, or a fresh read if this handle never loaded it
    pub async fn load_meta(&self) -> Result<StoreMeta, StoreError> {
        match &self.meta {
            Some(meta) => Ok(meta.clone()),
            None => self.base.load_meta().await,
        }
    }

    pub fn owner(&self) -> Result<PublicKeys, StoreError> {
        Ok(self.meta()?.owner)
    }

    pub fn is_owner(&self) -> bool {
        match (self.base.identity(), &self.meta) {
            (Ok(identity), Some(meta)) => identity.is(&meta.owner),
            _ => false,
        }
    }

    pub fn only_members(&self) -> bool {
        self.meta.as_ref().is_some_and(|meta| meta.only_members)
    }

    /// Restrict the store to invited correspondents (owner only)
    pub async fn set_only_members(&mut self, only_members: bool) -> Result<(), StoreError> {
        self.unlock().await?;
        StoreMeta::save_policy(self.base.graph(), self.base.location()?, only_members).await?;
        if let Some(meta) = self.meta.as_mut() {
            meta.only_members = only_members;
        }
        Ok(())
    }

    /// Record `target` as a correspondent (owner only)
    pub async fn invite(&mut self, target: impl Into<Invitee>) -> Result<(), StoreError> {
        self.unlock().await?;
        let target = target.into().resolve(self.context()).await?;
        let owner = self.base.identity()?;
        let meta = self.meta()?;
        let location = self.base.location()?;

        let idhash = owner.shared_id_hash_with(
            &target.sign_pub().to_base64(),
            target.public_keys(),
            &meta.salt,
        )?;
        let path = paths::member(location, &idhash);
        if self.base.graph().exists(&path).await? {
            tracing::info!(%location, alias = %target.alias(), "already invited");
            return Ok(());
        }

        let entry = MemberEntry {
            alias: target.alias(),
            sign_pub: *target.sign_pub(),
            shared_key: None,
            owner_pair: None,
            write_pair: None,
        };
        let envelope = owner.shared_encrypt_and_sign(target.public_keys(), &entry)?;
        self.base.graph().put(&path, envelope).await?;
        tracing::debug!(%location, alias = %target.alias(), "invited correspondent");
        Ok(())
    }

    /// Remove `target`'s entry (owner only)
    pub async fn revoke(&mut self, target: impl Into<Invitee>) -> Result<(), StoreError> {
        self.unlock().await?;
        let target = target.into().resolve(self.context()).await?;
        let owner = self.base.identity()?;
        let idhash = owner.shared_id_hash_with(
            &target.sign_pub().to_base64(),
            target.public_keys(),
            &self.meta()?.salt,
        )?;
        self.base
            .graph()
            .remove(&paths::member(self.base.location()?, &idhash))
            .await?;
        Ok(())
    }

    /// Owner side: whether `keys` belong to an invited correspondent
    pub async fn verify_member(&self, keys: &PublicKeys) -> Result<bool, StoreError> {
        let owner = self.base.identity()?;
        let meta = self.meta()?;
        if !owner.is(&meta.owner) {
            return Err(StoreError::NoPermission);
        }
        let idhash = owner.shared_id_hash_with(&keys.sign_pub.to_base64(), keys, &meta.salt)?;
        let Some(envelope) = self
            .base
            .graph()
            .get(&paths::member(self.base.location()?, &idhash))
            .await?
        else {
            return Ok(false);
        };
        match owner.shared_verify_and_decrypt::<MemberEntry>(owner.sign_pub(), keys, &envelope) {
            Ok(entry) => Ok(entry.sign_pub == keys.sign_pub),
            Err(e) => {
                tracing::warn!("unreadable member entry: {e}");
                Ok(false)
            }
        }
    }

    /// Correspondent side: whether the owner invited the signed-on identity
    pub async fn is_invited(&self) -> Result<bool, StoreError> {
        let identity = self.base.identity()?;
        let meta = self.load_meta().await?;
        let idhash = identity.shared_id_hash_with(
            &identity.sign_pub().to_base64(),
            &meta.owner,
            &meta.salt,
        )?;
        let Some(envelope) = self
            .base
            .graph()
            .get(&paths::member(self.base.location()?, &idhash))
            .await?
        else {
            return Ok(false);
        };
        Ok(identity
            .shared_verify_and_decrypt::<MemberEntry>(&meta.owner.sign_pub, &meta.owner, &envelope)
            .is_ok())
    }

    /// Encrypt `payload` for `peer` and sign it as the signed-on identity
    pub fn seal<T: Serialize + ?Sized>(&self, peer: &PublicKeys, payload: &T) -> Result<String, StoreError> {
        Ok(self.base.identity()?.shared_encrypt_and_sign(peer, payload)?)
    }

    /// Open an envelope `peer` sealed for the signed-on identity
    pub fn open<T: DeserializeOwned>(&self, peer: &PublicKeys, envelope: &str) -> Result<T, StoreError> {
        Ok(self
            .base
            .identity()?
            .shared_verify_and_decrypt(&peer.sign_pub, peer, envelope)?)
    }

    async fn restore_meta(&mut self) -> Result<StoreMeta, StoreError> {
        if let Some(meta) = &self.meta {
            return Ok(meta.clone());
        }
        let meta = self.base.load_meta().await?;
        self.meta = Some(meta.clone());
        Ok(meta)
    }
}
