use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::meta::paths;
use super::{Context, Invitee, MemberEntry, SecureStore, StoreError, StoreMeta, StoreState};
use crate::crypto::{self, PublicKeys, Secret, SignPublicKey, SIGNED_PREFIX};
use crate::graph::Location;
use crate::identity::{Identity, SharedCryptoCapability};

/// Length of a store salt
const SALT_LEN: usize = 24;
/// Alias given to ghost identities
const GHOST_ALIAS: &str = "ghost";

/// A decrypted member entry with its keypairs ready to use
#[derive(Debug, Clone)]
struct Member {
    entry: MemberEntry,
    admin: Option<Identity>,
    writer: Option<Identity>,
}

impl Member {
    fn from_entry(entry: MemberEntry) -> Result<Self, StoreError> {
        let admin = entry
            .owner_pair
            .clone()
            .map(Identity::from_keys)
            .transpose()?;
        let writer = entry
            .write_pair
            .clone()
            .map(Identity::from_keys)
            .transpose()?;
        Ok(Self {
            entry,
            admin,
            writer,
        })
    }
}

/// A group store with cryptographically enforced membership
///
/// Creating a store generates an owner keypair, a write keypair, a salt and
/// a group key. Each member gets an entry encrypted between the owner
/// keypair and the member, stored under an address only those two can
/// compute. Content is encrypted with the group key and signed with the
/// write keypair, so reading needs membership and writing needs the write
/// grant.
///
/// Mutating operations take `&mut self`; share a handle across tasks behind
/// a `tokio::sync::Mutex`.
#[derive(Debug, Clone)]
pub struct SharedStore {
    base: SecureStore,
    meta: Option<StoreMeta>,
    member: Option<Member>,
}

impl SharedStore {
    pub fn new(ctx: Context) -> Self {
        Self {
            base: SecureStore::new(ctx),
            meta: None,
            member: None,
        }
    }

    pub fn at(ctx: Context, location: Location) -> Self {
        Self {
            base: SecureStore::at(ctx, location),
            meta: None,
            member: None,
        }
    }

    pub fn bind(&mut self, location: Location) {
        self.base.bind(location);
        self.meta = None;
        self.member = None;
    }

    /// Adopt `identity`; switching identities drops any unlocked membership
    pub fn signon(&mut self, identity: Option<Identity>) -> Result<&Identity, StoreError> {
        if let Some(next) = &identity {
            let same = self
                .base
                .identity()
                .map(|current| current.is(next.public_keys()))
                .unwrap_or(false);
            if !same {
                self.member = None;
            }
        }
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

    pub async fn is(&self) -> Result<bool, StoreError> {
        self.base.is().await
    }

    pub async fn exists(&self) -> Result<bool, StoreError> {
        self.base.exists().await
    }

    pub fn meta(&self) -> Result<&StoreMeta, StoreError> {
        self.meta.as_ref().ok_or(StoreError::StoreExistsNot)
    }

    /// The caller's own decrypted entry, once unlocked
    pub fn member(&self) -> Option<&MemberEntry> {
        self.member.as_ref().map(|member| &member.entry)
    }

    pub fn is_unlocked(&self) -> bool {
        self.member.is_some()
    }

    /// Whether the caller holds the owner keypair
    pub fn is_admin(&self) -> bool {
        self.member
            .as_ref()
            .is_some_and(|member| member.admin.is_some())
    }

    pub fn can_write(&self) -> bool {
        self.member
            .as_ref()
            .is_some_and(|member| member.writer.is_some())
    }

    /// Create a new store at the bound location with the signed-on
    /// identity as its first member and administrator
    pub async fn create(&mut self) -> Result<(), StoreError> {
        let location = self.base.location()?.clone();
        let identity = self.base.identity()?.clone();
        if self.member.is_some() || self.base.is().await? {
            return Err(StoreError::StoreExists);
        }

        let owner = Identity::generate()?;
        let writer = Identity::generate()?;
        let meta = StoreMeta {
            owner: *owner.public_keys(),
            write: Some(*writer.public_keys()),
            salt: crypto::random_string(SALT_LEN)?,
            ghost: None,
            only_members: false,
        };
        meta.save(self.base.graph(), &location).await?;

        let entry = MemberEntry {
            alias: identity.alias(),
            sign_pub: *identity.sign_pub(),
            shared_key: Some(Secret::generate()?),
            owner_pair: Some(owner.keys().clone()),
            write_pair: Some(writer.keys().clone()),
        };
        self.write_member_entry(&owner, &meta, &identity, &entry)
            .await?;

        tracing::debug!(%location, creator = %identity.alias(), "created shared store");
        self.meta = Some(meta);
        self.member = Some(Member::from_entry(entry)?);
        self.base.set_state(StoreState::Created);
        self.base.set_state(StoreState::Established);
        Ok(())
    }

    /// Unlock the store if it exists, otherwise create it
    pub async fn create_if_missing(&mut self) -> Result<(), StoreError> {
        if self.base.exists().await? {
            self.unlock().await
        } else {
            self.create().await
        }
    }

    /// Sign on (optionally as `identity`) and unlock
    pub async fn join(&mut self, identity: Option<Identity>) -> Result<(), StoreError> {
        self.signon(identity)?;
        let previous = self.base.state();
        self.base.set_state(StoreState::Joined);
        if let Err(e) = self.unlock().await {
            self.base.set_state(previous);
            return Err(e);
        }
        Ok(())
    }

    /// Read the caller's member entry and recover the keys it carries
    pub async fn unlock(&mut self) -> Result<(), StoreError> {
        if self.member.is_some() {
            return Ok(());
        }
        let identity = self.base.identity()?.clone();
        let meta = self.restore_meta().await?;
        let location = self.base.location()?;

        let idhash = identity.shared_id_hash_with(
            &identity.sign_pub().to_base64(),
            &meta.owner,
            &meta.salt,
        )?;
        let Some(envelope) = self
            .base
            .graph()
            .get(&paths::member(location, &idhash))
            .await?
        else {
            tracing::debug!(%location, alias = %identity.alias(), "no member entry");
            return Err(StoreError::NoPermission);
        };
        let entry: MemberEntry = identity
            .shared_verify_and_decrypt(&meta.owner.sign_pub, &meta.owner, &envelope)
            .map_err(|_| StoreError::NoPermission)?;

        tracing::debug!(%location, alias = %entry.alias, "unlocked shared store");
        self.member = Some(Member::from_entry(entry)?);
        self.base.set_state(StoreState::Unlocked);
        self.base.set_state(StoreState::Established);
        Ok(())
    }

    /// Forget the unlocked membership and cached metadata
    pub fn leave(&mut self) {
        self.member = None;
        self.meta = None;
        if self.base.location().is_ok() {
            self.base.set_state(StoreState::Bound);
        }
    }

    /// Add `target` as a member, optionally with the write grant
    ///
    /// Inviting someone who already has an entry is a no-op.
    pub async fn invite(
        &mut self,
        target: impl Into<Invitee>,
        grant_write: bool,
    ) -> Result<(), StoreError> {
        self.unlock().await?;
        let target = target.into().resolve(self.context()).await?;
        let member = self.member.as_ref().ok_or(StoreError::NoPermission)?;
        let admin = member.admin.as_ref().ok_or(StoreError::NoPermission)?;
        let meta = self.meta()?;
        let location = self.base.location()?;

        let idhash = member_hash(admin, &target, meta)?;
        if self
            .base
            .graph()
            .exists(&paths::member(location, &idhash))
            .await?
        {
            tracing::info!(%location, alias = %target.alias(), "already invited");
            return Ok(());
        }

        let entry = MemberEntry {
            alias: target.alias(),
            sign_pub: *target.sign_pub(),
            shared_key: member.entry.shared_key.clone(),
            owner_pair: None,
            write_pair: if grant_write {
                member.entry.write_pair.clone()
            } else {
                None
            },
        };
        self.write_member_entry(admin, meta, &target, &entry).await?;
        tracing::debug!(%location, alias = %target.alias(), grant_write, "invited member");
        Ok(())
    }

    /// Remove `target`'s member entry
    ///
    /// The group key is not rotated: a revoked member who kept it can still
    /// read content written before and after the revocation if they can
    /// reach the graph.
    pub async fn revoke(&mut self, target: impl Into<Invitee>) -> Result<(), StoreError> {
        self.unlock().await?;
        let target = target.into().resolve(self.context()).await?;
        let admin = self.admin()?;
        let meta = self.meta()?;
        let location = self.base.location()?;

        let idhash = member_hash(admin, &target, meta)?;
        self.base
            .graph()
            .remove(&paths::member(location, &idhash))
            .await?;
        tracing::debug!(%location, alias = %target.alias(), "revoked member");
        Ok(())
    }

    /// Hand the write keypair to an existing member
    pub async fn grant_write(&mut self, target: impl Into<Invitee>) -> Result<(), StoreError> {
        self.unlock().await?;
        let write_pair = self
            .member
            .as_ref()
            .and_then(|member| member.entry.write_pair.clone())
            .ok_or(StoreError::NoPermission)?;
        self.modify_member(target.into(), move |entry| {
            entry.write_pair = Some(write_pair)
        })
        .await
    }

    /// Take the write keypair back from a member
    pub async fn revoke_write(&mut self, target: impl Into<Invitee>) -> Result<(), StoreError> {
        self.unlock().await?;
        self.modify_member(target.into(), |entry| entry.write_pair = None)
            .await
    }

    /// Whether `target` currently has a member entry (administrators only)
    pub async fn is_member(&mut self, target: impl Into<Invitee>) -> Result<bool, StoreError> {
        self.unlock().await?;
        let target = target.into().resolve(self.context()).await?;
        let idhash = member_hash(self.admin()?, &target, self.meta()?)?;
        Ok(self
            .base
            .graph()
            .exists(&paths::member(self.base.location()?, &idhash))
            .await?)
    }

    /// Publish a ghost keypair and invite it
    ///
    /// Anyone able to read the store metadata can then join as the ghost.
    pub async fn with_ghost(&mut self, grant_write: bool) -> Result<PublicKeys, StoreError> {
        self.unlock().await?;
        self.admin()?;
        let ghost = Identity::generate()?.with_alias(GHOST_ALIAS);
        let location = self.base.location()?.clone();
        self.base
            .write_json(&paths::ghost(&location), ghost.keys())
            .await?;
        if let Some(meta) = self.meta.as_mut() {
            meta.ghost = Some(ghost.keys().clone());
        }
        self.invite(&ghost, grant_write).await?;
        Ok(*ghost.public_keys())
    }

    /// Join using the published ghost keypair
    pub async fn join_as_ghost(&mut self) -> Result<(), StoreError> {
        self.restore_meta().await?;
        let location = self.base.location()?;
        let keys = self
            .base
            .read_json(&paths::ghost(location))
            .await?
            .ok_or(StoreError::NoPermission)?;
        let ghost = Identity::from_keys(keys)?.with_alias(GHOST_ALIAS);
        self.join(Some(ghost)).await
    }

    /// Encrypt `value` under `key` in the content area
    pub async fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        self.unlock().await?;
        let item = ContentItem::value(key, serde_json::to_value(value)?);
        self.put_item(item).await
    }

    /// Decrypt the value under `key`, `None` if absent or dropped
    pub async fn get<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, StoreError> {
        self.unlock().await?;
        match self.get_item(key).await? {
            Some(ContentItem {
                reference: Some(_), ..
            }) => Err(StoreError::NotAReference(key.to_string())),
            Some(item) if !item.dropped => {
                Ok(Some(serde_json::from_value(item.value.unwrap_or_default())?))
            }
            _ => Ok(None),
        }
    }

    /// Replace the value under `key` with a signed tombstone
    pub async fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.unlock().await?;
        self.put_item(ContentItem::tombstone(key)).await
    }

    pub(crate) async fn put_item(&self, item: ContentItem) -> Result<(), StoreError> {
        let cipher = self.cipher()?;
        let path = paths::content(self.base.location()?).child(self.key_hash(&item.key)?);
        let sealed = cipher.seal(&item)?;
        self.base.graph().put(&path, sealed).await?;
        Ok(())
    }

    pub(crate) async fn get_item(&self, key: &str) -> Result<Option<ContentItem>, StoreError> {
        let cipher = self.cipher()?;
        let path = paths::content(self.base.location()?).child(self.key_hash(key)?);
        match self.base.graph().get(&path).await? {
            Some(sealed) => Ok(Some(cipher.open(&sealed)?)),
            None => Ok(None),
        }
    }

    /// Every readable content item, skipping entries that fail to open
    pub(crate) async fn items(&self) -> Result<Vec<ContentItem>, StoreError> {
        let cipher = self.cipher()?;
        let children = self
            .base
            .graph()
            .children(&paths::content(self.base.location()?))
            .await?;
        Ok(children
            .into_iter()
            .filter_map(|(hash, sealed)| match cipher.open::<ContentItem>(&sealed) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(%hash, "skipping unreadable content entry: {e}");
                    None
                }
            })
            .collect())
    }

    /// Content address of `key`
    pub fn key_hash(&self, key: &str) -> Result<String, StoreError> {
        Ok(crypto::work(key, &self.meta()?.salt))
    }

    pub(crate) fn cipher(&self) -> Result<ContentCipher, StoreError> {
        let member = self.member.as_ref().ok_or(StoreError::NoPermission)?;
        let shared_key = member
            .entry
            .shared_key
            .clone()
            .ok_or(StoreError::NoPermission)?;
        let write_pub = self
            .meta()?
            .write
            .ok_or_else(|| anyhow::anyhow!("shared store without write key"))?
            .sign_pub;
        Ok(ContentCipher {
            shared_key,
            write_pub,
            writer: member.writer.clone(),
        })
    }

    async fn restore_meta(&mut self) -> Result<StoreMeta, StoreError> {
        if let Some(meta) = &self.meta {
            return Ok(meta.clone());
        }
        let meta = self.base.load_meta().await?;
        self.meta = Some(meta.clone());
        Ok(meta)
    }

    fn admin(&self) -> Result<&Identity, StoreError> {
        self.member
            .as_ref()
            .and_then(|member| member.admin.as_ref())
            .ok_or(StoreError::NoPermission)
    }

    async fn write_member_entry(
        &self,
        admin: &Identity,
        meta: &StoreMeta,
        target: &Identity,
        entry: &MemberEntry,
    ) -> Result<(), StoreError> {
        let idhash = member_hash(admin, target, meta)?;
        let envelope = admin.shared_encrypt_and_sign(target.public_keys(), entry)?;
        self.base
            .graph()
            .put(&paths::member(self.base.location()?, &idhash), envelope)
            .await?;
        Ok(())
    }

    async fn modify_member<F>(&mut self, target: Invitee, modify: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut MemberEntry),
    {
        let target = target.resolve(self.context()).await?;
        let admin = self.admin()?;
        let meta = self.meta()?;
        let idhash = member_hash(admin, &target, meta)?;
        let path = paths::member(self.base.location()?, &idhash);

        let envelope = self
            .base
            .graph()
            .get(&path)
            .await?
            .ok_or_else(|| StoreError::IdentityNotFound(target.alias()))?;
        let mut entry: MemberEntry =
            admin.shared_verify_and_decrypt(admin.sign_pub(), target.public_keys(), &envelope)?;
        modify(&mut entry);
        self.write_member_entry(admin, meta, &target, &entry).await
    }
}

/// Address of `target`'s entry as computed by the administrator
fn member_hash(admin: &Identity, target: &Identity, meta: &StoreMeta) -> Result<String, StoreError> {
    Ok(admin.shared_id_hash_with(
        &target.sign_pub().to_base64(),
        target.public_keys(),
        &meta.salt,
    )?)
}

/// Plaintext of a content entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ContentItem {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Location>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dropped: bool,
}

impl ContentItem {
    pub fn value(key: &str, value: serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value),
            reference: None,
            dropped: false,
        }
    }

    pub fn reference(key: &str, location: Location) -> Self {
        Self {
            key: key.to_string(),
            value: None,
            reference: Some(location),
            dropped: false,
        }
    }

    pub fn tombstone(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: None,
            reference: None,
            dropped: true,
        }
    }
}

/// Group-key envelope for content, detached from the store so background
/// tasks can open what they receive
#[derive(Clone)]
pub(crate) struct ContentCipher {
    shared_key: Secret,
    write_pub: SignPublicKey,
    writer: Option<Identity>,
}

impl ContentCipher {
    /// Encrypt with the group key and sign with the write keypair
    pub fn seal<T: Serialize + ?Sized>(&self, item: &T) -> Result<String, StoreError> {
        let writer = self.writer.as_ref().ok_or(StoreError::NoPermission)?;
        let plaintext = serde_json::to_vec(item)?;
        let encrypted = crypto::encrypt(&plaintext, &self.shared_key)?.to_envelope_string()?;
        let signed = writer.sign(&encrypted)?;
        Ok(format!("{SIGNED_PREFIX}{signed}"))
    }

    /// Verify against the write key, then decrypt with the group key
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Result<T, StoreError> {
        let encrypted = crypto::verify(sealed, &self.write_pub).map_err(|e| {
            tracing::debug!("content signature rejected: {e}");
            StoreError::CantDecrypt
        })?;
        let plaintext =
            crypto::decrypt(&encrypted, &self.shared_key).map_err(|_| StoreError::CantDecrypt)?;
        serde_json::from_slice(&plaintext).map_err(|_| StoreError::CantDecrypt)
    }
}
