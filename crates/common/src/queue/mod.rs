//! Request/response RPC over a two-party store
//!
//! The queue owner runs a service with [`Queue::handle`]; anyone who can
//! reach the queue location can [`Queue::request`]. Each request is sealed
//! with a fresh ephemeral identity, so two requests from the same caller
//! cannot be linked by their keys, and the response is sealed back to that
//! ephemeral identity.
//!
//! A request settles exactly once: with the service's answer, with the
//! service's error, with a timeout, or with a cancellation. After settling
//! the requester stops listening to the record.

mod client;
mod record;
mod service;

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::graph::{GraphError, Location};
use crate::identity::{Identity, IdentityError, SharedCryptoCapability};
use crate::store::{paths, Context, StoreError, TwinStore};

pub use client::{CancelHandle, PendingRequest};
pub use record::{ControlBlock, MemberProof, RequestRecord, ResponseBody};
pub use service::{ResponseSink, ServiceRequest};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("request timed out")]
    Timeout,
    #[error("request canceled")]
    Canceled,
    /// The service answered with an error
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<IdentityError> for QueueError {
    fn from(err: IdentityError) -> Self {
        QueueError::Store(err.into())
    }
}

impl From<GraphError> for QueueError {
    fn from(err: GraphError) -> Self {
        QueueError::Store(err.into())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Store(err.into())
    }
}

/// An RPC endpoint at a graph location
///
/// Two-party operations (create, join, invite, ...) come from the
/// underlying [`TwinStore`] through `Deref`.
#[derive(Debug)]
pub struct Queue {
    twin: TwinStore,
    service: Option<JoinHandle<()>>,
    only_members: Arc<AtomicBool>,
}

impl Deref for Queue {
    type Target = TwinStore;
    fn deref(&self) -> &Self::Target {
        &self.twin
    }
}

impl DerefMut for Queue {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.twin
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Queue {
    pub fn new(ctx: Context) -> Self {
        Self {
            twin: TwinStore::new(ctx),
            service: None,
            only_members: Arc::default(),
        }
    }

    pub fn at(ctx: Context, location: Location) -> Self {
        Self {
            twin: TwinStore::at(ctx, location),
            service: None,
            only_members: Arc::default(),
        }
    }

    fn log(&self) -> Result<Location, StoreError> {
        Ok(paths::queue(self.twin.location()?))
    }

    /// Send `payload` and wait for the response
    ///
    /// Bounded by the configured request timeout, if any.
    pub async fn request<T>(&self, payload: &T) -> Result<serde_json::Value, QueueError>
    where
        T: Serialize + ?Sized,
    {
        self.send_request(payload).await?.response().await
    }

    /// Send `payload` and return a handle on the pending request
    pub async fn send_request<T>(&self, payload: &T) -> Result<PendingRequest, QueueError>
    where
        T: Serialize + ?Sized,
    {
        let meta = self.twin.load_meta().await?;
        let ephemeral = Identity::generate()?;

        let member = match self.twin.identity() {
            Ok(identity) => Some(MemberProof {
                keys: *identity.public_keys(),
                proof: identity.sign(&ephemeral.sign_pub().to_base64())?,
            }),
            Err(_) => None,
        };
        let ctrl = ControlBlock {
            member,
            canceled: false,
        };
        let record = RequestRecord {
            keys: *ephemeral.public_keys(),
            ctrl: Some(ephemeral.shared_encrypt_and_sign(&meta.owner, &ctrl)?),
            payload: ephemeral.shared_encrypt_and_sign(&meta.owner, payload)?,
            response: None,
        };

        let graph = self.twin.context().graph().clone();
        let path = self
            .log()?
            .child(uuid::Uuid::new_v4().simple().to_string());
        // listen before writing so the response cannot be missed
        let subscription = graph.subscribe(&path)?;
        graph.put(&path, serde_json::to_string(&record)?).await?;
        tracing::debug!(request = %path.key(), "queued request");

        let cancel = CancelHandle::new(graph, path, record, ctrl, ephemeral, meta.owner);
        Ok(PendingRequest::new(
            cancel,
            subscription,
            self.twin.context().config().request_timeout(),
        ))
    }

    /// Serve requests with `handler`, as the queue owner
    ///
    /// Every incoming request runs on its own task. The handler answers
    /// through the [`ResponseSink`]; returning an error or panicking answers
    /// with an error instead. Replaces any handler already running.
    pub async fn handle<F, Fut>(&mut self, handler: F) -> Result<(), QueueError>
    where
        F: Fn(ServiceRequest, ResponseSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.twin.unlock().await?;
        self.stop();

        let log = self.log()?;
        let subscription = self.twin.context().graph().subscribe_map(&log)?;
        self.only_members
            .store(self.twin.only_members(), Ordering::SeqCst);
        let worker = service::Worker::new(self.twin.clone(), log, self.only_members.clone(), handler)?;
        self.service = Some(tokio::spawn(worker.run(subscription)));
        tracing::debug!(location = %self.twin.location()?, "queue service started");
        Ok(())
    }

    /// Restrict the queue to invited correspondents (owner only)
    ///
    /// Takes effect immediately for a running service.
    pub async fn set_only_members(&mut self, only_members: bool) -> Result<(), QueueError> {
        self.twin.set_only_members(only_members).await?;
        self.only_members.store(only_members, Ordering::SeqCst);
        Ok(())
    }

    /// Stop serving requests
    pub fn stop(&mut self) {
        if let Some(service) = self.service.take() {
            service.abort();
        }
    }

    pub fn is_serving(&self) -> bool {
        self.service.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Delete answered and canceled records (owner only)
    pub async fn purge(&mut self) -> Result<usize, QueueError> {
        self.twin.unlock().await?;
        let owner = self.twin.identity()?.clone();
        let log = self.log()?;
        let graph = self.twin.context().graph().clone();

        let mut purged = 0;
        for (key, value) in graph.children(&log).await? {
            let Ok(record) = serde_json::from_str::<RequestRecord>(&value) else {
                continue;
            };
            let canceled = record
                .ctrl
                .as_deref()
                .and_then(|ctrl| {
                    owner
                        .shared_verify_and_decrypt::<ControlBlock>(&record.keys.sign_pub, &record.keys, ctrl)
                        .ok()
                })
                .is_some_and(|ctrl| ctrl.canceled);
            if record.response.is_some() || canceled {
                graph.remove(&log.child(&key)).await?;
                purged += 1;
            }
        }
        tracing::debug!(purged, "purged settled requests");
        Ok(purged)
    }
}
