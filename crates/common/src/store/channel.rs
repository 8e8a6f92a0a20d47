use std::future::Future;
use std::ops::{Deref, DerefMut};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::listeners::{ListenerId, Listeners};
use super::meta::paths;
use super::shared::ContentCipher;
use super::{Context, SharedStore, StoreError};
use crate::crypto::SignPublicKey;
use crate::graph::Location;
use crate::identity::Identity;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelItem {
    from: SignPublicKey,
    alias: String,
    message: serde_json::Value,
}

/// A message read from a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Key of the message in the channel log
    pub id: String,
    /// Sender as claimed inside the envelope
    pub from: SignPublicKey,
    pub alias: String,
    pub message: serde_json::Value,
}

impl ChannelMessage {
    fn from_sealed(cipher: &ContentCipher, id: String, sealed: &str) -> Result<Self, StoreError> {
        let item: ChannelItem = cipher.open(sealed)?;
        Ok(Self {
            id,
            from: item.from,
            alias: item.alias,
            message: item.message,
        })
    }

    pub fn message_as<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.message.clone())?)
    }
}

/// Private group messaging over an append-only encrypted log
///
/// Members with the write grant can `send`; every member can read. Live
/// messages go to listeners in arrival order.
#[derive(Debug)]
pub struct Channel {
    shared: SharedStore,
    listeners: Listeners<ChannelMessage>,
    feed: Option<JoinHandle<()>>,
}

impl Deref for Channel {
    type Target = SharedStore;
    fn deref(&self) -> &Self::Target {
        &self.shared
    }
}

impl DerefMut for Channel {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.shared
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

impl Channel {
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

    pub fn leave(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
        self.shared.leave();
    }

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
            .subscribe_map(&paths::channel(&location))?;
        let listeners = self.listeners.clone();

        self.feed = Some(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(sealed) = event.value else {
                    continue;
                };
                match ChannelMessage::from_sealed(&cipher, event.key.clone(), &sealed) {
                    Ok(message) => listeners.dispatch(message),
                    Err(e) => {
                        tracing::warn!(%location, id = %event.key, "skipping unreadable message: {e}")
                    }
                }
            }
        }));
        Ok(())
    }

    /// Append a message, returns its id
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<String, StoreError> {
        self.unlock().await?;
        let sender = self.shared.identity()?;
        let item = ChannelItem {
            from: *sender.sign_pub(),
            alias: sender.alias(),
            message: serde_json::to_value(message)?,
        };
        let sealed = self.shared.cipher()?.seal(&item)?;
        let location = self.shared.location()?;
        let added = self
            .shared
            .context()
            .graph()
            .add(&paths::channel(location), sealed)
            .await?;
        Ok(added.key().to_string())
    }

    /// Every readable message in the log, oldest first
    pub async fn messages(&mut self) -> Result<Vec<ChannelMessage>, StoreError> {
        self.unlock().await?;
        let cipher = self.shared.cipher()?;
        let location = self.shared.location()?;
        let children = self
            .shared
            .context()
            .graph()
            .children(&paths::channel(location))
            .await?;
        Ok(children
            .into_iter()
            .filter_map(|(id, sealed)| {
                match ChannelMessage::from_sealed(&cipher, id.clone(), &sealed) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        tracing::warn!(%location, %id, "skipping unreadable message: {e}");
                        None
                    }
                }
            })
            .collect())
    }

    pub fn on_message<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(ChannelMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
