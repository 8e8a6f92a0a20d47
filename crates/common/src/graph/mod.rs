//! The backing graph store
//!
//! The protocol only needs a small slice of a replicated graph database:
//! string leaves addressed by `/`-separated paths, child listing, and live
//! subscriptions on a node or on a node's direct children. Replication,
//! merge and transport belong to the implementation behind [`GraphStore`].
//!
//! Writes may become visible to readers late. Callers that need to observe
//! their own writes (store creation, then existence checks) re-check once
//! after a short delay instead of assuming read-your-writes.

mod location;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;

pub use location::Location;
pub use memory::MemoryGraph;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("graph backend error: {0}")]
    Backend(String),
    #[error("graph error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A single change observed by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Last path segment of the node that changed
    pub key: String,
    /// New value, `None` when the node was removed
    pub value: Option<String>,
}

/// Live feed of [`ChangeEvent`]s
///
/// Delivers the current value(s) first, then every subsequent change in the
/// order the store applied them. Dropping the handle (or calling
/// [`Subscription::cancel`]) detaches it.
#[derive(Debug)]
pub struct Subscription {
    rx: flume::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(rx: flume::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next change, `None` once the store side has gone away
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv_async().await.ok()
    }

    pub fn cancel(self) {}
}

#[async_trait]
pub trait GraphStore: Send + Sync + Debug + 'static {
    async fn exists(&self, path: &Location) -> Result<bool, GraphError>;

    async fn get(&self, path: &Location) -> Result<Option<String>, GraphError>;

    async fn put(&self, path: &Location, value: String) -> Result<(), GraphError>;

    /// Remove a leaf and everything beneath it
    async fn remove(&self, path: &Location) -> Result<(), GraphError>;

    /// Direct child leaves of `path` in insertion order
    async fn children(&self, path: &Location) -> Result<Vec<(String, String)>, GraphError>;

    /// Append `value` under a fresh unique key and return its location
    async fn add(&self, path: &Location, value: String) -> Result<Location, GraphError> {
        let child = path.child(uuid::Uuid::new_v4().simple().to_string());
        self.put(&child, value).await?;
        Ok(child)
    }

    /// Watch a single node
    fn subscribe(&self, path: &Location) -> Result<Subscription, GraphError>;

    /// Watch the direct children of a node
    fn subscribe_map(&self, path: &Location) -> Result<Subscription, GraphError>;
}
