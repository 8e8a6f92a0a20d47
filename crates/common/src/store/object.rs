use std::future::Future;
use std::ops::{Deref, DerefMut};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::listeners::{ListenerId, Listeners};
use super::meta::paths;
use super::shared::ContentItem;
use super::{Context, SharedStore, StoreError};
use crate::graph::Location;
use crate::identity::Identity;

/// A decrypted object store entry
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectValue {
    Literal(serde_json::Value),
    /// Location of another object store
    StoreRef(Location),
}

impl ObjectValue {
    fn from_item(item: ContentItem) -> Option<Self> {
        if item.dropped {
            return None;
        }
        Some(match item.reference {
            Some(location) => ObjectValue::StoreRef(location),
            None => ObjectValue::Literal(item.value.unwrap_or_default()),
        })
    }

    pub fn as_literal(&self) -> Option<&serde_json::Value> {
        match self {
            ObjectValue::Literal(value) => Some(value),
            ObjectValue::StoreRef(_) => None,
        }
    }
}

/// Event delivered to object store listeners
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectChange {
    pub key: String,
    /// `None` once the entry was dropped
    pub value: Option<ObjectValue>,
}

/// A shared store whose entries may point at further stores
///
/// Membership operations are inherited from [`SharedStore`] through
/// `Deref`. Once unlocked or created, the store follows its content area
/// and hands every readable change to its listeners; entries that fail to
/// verify or decrypt are logged and skipped.
#[derive(Debug)]
pub struct ObjectStore {
    shared: SharedStore,
    listeners: Listeners<ObjectChange>,
    feed: Option<JoinHandle<()>>,
}

impl Deref for ObjectStore {
    type Target = SharedStore;
    fn deref(&self) -> &Self::Target {
        &self.shared
    }
}

impl DerefMut for ObjectStore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.shared
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

impl ObjectStore {
    pub fn new(ctx: Context) -> Self {
        Self::from_shared(SharedStore::new(ctx))
    }

    pub fn at(ctx: Context, location: Location) -> Self {
        Self::from_shared(SharedStore::at(ctx, location))
    }

    fn from_shared(shared: SharedStore) -> Self {
        Self {
            shared,
            listeners: Listeners::new(),
            feed: None,
        }
    }

    pub async fn create(&mut self) -> Result<(), StoreError> {
        self.shared.create().await?;
        self.established()
    }

    pub async fn create_if_missing(&mut self) -> Result<(), StoreError> {
        self.shared.create_if_missing().await?;
        self.established()
    }

    pub async fn join(&mut self, identity: Option<Identity>) -> Result<(), StoreError> {
        self.shared.join(identity).await?;
        self.established()
    }

    pub async fn unlock(&mut self) -> Result<(), StoreError> {
        self.shared.unlock().await?;
        self.established()
    }

    pub async fn join_as_ghost(&mut self) -> Result<(), StoreError> {
        self.shared.join_as_ghost().await?;
        self.established()
    }

    /// Stop following the store and forget the membership
    pub fn leave(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
        self.shared.leave();
    }

    /// Attach the content subscription, once
    fn established(&mut self) -> Result<(), StoreError> {
        if self.feed.is_some() {
            return Ok(());
        }
        let cipher = self.shared.cipher()?;
        let location = self.shared.location()?.clone();
        let mut subscription = self
            .shared
            .context()
            .graph()
            .subscribe_map(&paths::content(&location))?;
        let listeners = self.listeners.clone();

        self.feed = Some(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(sealed) = event.value else {
                    continue;
                };
                match cipher.open::<ContentItem>(&sealed) {
                    Ok(item) => listeners.dispatch(ObjectChange {
                        key: item.key.clone(),
                        value: ObjectValue::from_item(item),
                    }),
                    Err(e) => {
                        tracing::warn!(%location, hash = %event.key, "skipping unreadable entry: {e}")
                    }
                }
            }
        }));
        Ok(())
    }

    /// Store a literal value under `key`
    pub async fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        self.unlock().await?;
        let item = ContentItem::value(key, serde_json::to_value(value)?);
        self.shared.put_item(item).await
    }

    /// Store a reference to the object store at `location`
    pub async fn put_ref(&mut self, key: &str, location: &Location) -> Result<(), StoreError> {
        self.unlock().await?;
        self.shared
            .put_item(ContentItem::reference(key, location.clone()))
            .await
    }

    /// Create a nested store at a fresh location and reference it under `key`
    ///
    /// The caller becomes the nested store's administrator; other members
    /// must be invited into it separately before they can resolve it.
    pub async fn add_object(&mut self, key: &str) -> Result<ObjectStore, StoreError> {
        self.unlock().await?;
        let identity = self.shared.identity()?.clone();
        let mut nested = ObjectStore::at(self.shared.context().clone(), Location::random()?);
        nested.signon(Some(identity))?;
        nested.create().await?;
        let location = nested.location()?.clone();
        self.put_ref(key, &location).await?;
        Ok(nested)
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<ObjectValue>, StoreError> {
        self.unlock().await?;
        Ok(self
            .shared
            .get_item(key)
            .await?
            .and_then(ObjectValue::from_item))
    }

    /// Read a literal value as `T`
    pub async fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(ObjectValue::Literal(value)) => Ok(Some(serde_json::from_value(value)?)),
            Some(ObjectValue::StoreRef(location)) => Err(StoreError::Default(anyhow::anyhow!(
                "entry {key} is a reference to {location}, not a literal"
            ))),
            None => Ok(None),
        }
    }

    /// Resolve the reference under `key` and join that store as the caller
    pub async fn get_object(&mut self, key: &str) -> Result<Option<ObjectStore>, StoreError> {
        let location = match self.get(key).await? {
            Some(ObjectValue::StoreRef(location)) => location,
            Some(ObjectValue::Literal(_)) => return Err(StoreError::NotAReference(key.to_string())),
            None => return Ok(None),
        };
        let identity = self.shared.identity()?.clone();
        let mut nested = ObjectStore::at(self.shared.context().clone(), location);
        nested.join(Some(identity)).await?;
        Ok(Some(nested))
    }

    /// Drop `key` by writing a signed tombstone
    pub async fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.unlock().await?;
        self.shared.put_item(ContentItem::tombstone(key)).await
    }

    /// All live entries in insertion order
    pub async fn entries(&mut self) -> Result<Vec<(String, ObjectValue)>, StoreError> {
        self.unlock().await?;
        Ok(self
            .shared
            .items()
            .await?
            .into_iter()
            .filter_map(|item| {
                let key = item.key.clone();
                ObjectValue::from_item(item).map(|value| (key, value))
            })
            .collect())
    }

    /// Call `listener` for every change to `key`
    pub fn on<F, Fut>(&self, key: &str, listener: F) -> ListenerId
    where
        F: Fn(Option<ObjectValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let key = key.to_string();
        self.listeners.register(move |change: ObjectChange| {
            let wanted = change.key == key;
            let run = wanted.then(|| listener(change.value));
            async move {
                match run {
                    Some(run) => run.await,
                    None => Ok(()),
                }
            }
        })
    }

    /// Call `listener` for every change in the store
    pub fn on_change<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(ObjectChange) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
