use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::{ControlBlock, QueueError, RequestRecord, ResponseBody};
use crate::crypto::PublicKeys;
use crate::graph::{GraphStore, Location, Subscription};
use crate::identity::{Identity, SharedCryptoCapability};
use crate::store::StoreError;

#[derive(Debug)]
struct Inflight {
    graph: Arc<dyn GraphStore>,
    path: Location,
    record: RequestRecord,
    ctrl: ControlBlock,
    ephemeral: Identity,
    owner: PublicKeys,
    canceled: watch::Sender<bool>,
}

/// Cancels a pending request from anywhere
///
/// Cloneable, so a request can be canceled from another task while the
/// requester is waiting on [`PendingRequest::response`].
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<Inflight>);

impl CancelHandle {
    pub(super) fn new(
        graph: Arc<dyn GraphStore>,
        path: Location,
        record: RequestRecord,
        ctrl: ControlBlock,
        ephemeral: Identity,
        owner: PublicKeys,
    ) -> Self {
        let (canceled, _) = watch::channel(false);
        Self(Arc::new(Inflight {
            graph,
            path,
            record,
            ctrl,
            ephemeral,
            owner,
            canceled,
        }))
    }

    pub fn id(&self) -> &str {
        self.0.path.key()
    }

    pub fn is_canceled(&self) -> bool {
        *self.0.canceled.borrow()
    }

    /// Mark the request canceled so the service skips it
    ///
    /// The pending request settles with [`QueueError::Canceled`]. An already
    /// answered record is left untouched.
    pub async fn cancel(&self) -> Result<(), QueueError> {
        if self.is_canceled() {
            return Ok(());
        }
        let inflight = &self.0;
        let answered = inflight
            .graph
            .get(&inflight.path)
            .await?
            .and_then(|value| serde_json::from_str::<RequestRecord>(&value).ok())
            .is_some_and(|record| record.response.is_some());

        if !answered {
            let ctrl = ControlBlock {
                canceled: true,
                ..inflight.ctrl.clone()
            };
            let mut record = inflight.record.clone();
            record.ctrl = Some(
                inflight
                    .ephemeral
                    .shared_encrypt_and_sign(&inflight.owner, &ctrl)?,
            );
            inflight
                .graph
                .put(&inflight.path, serde_json::to_string(&record)?)
                .await?;
            tracing::debug!(request = %self.id(), "canceled request");
        }
        inflight.canceled.send_replace(true);
        Ok(())
    }
}

/// A request waiting for its response
#[derive(Debug)]
pub struct PendingRequest {
    cancel: CancelHandle,
    subscription: Subscription,
    canceled: watch::Receiver<bool>,
    timeout: Option<Duration>,
}

impl PendingRequest {
    pub(super) fn new(cancel: CancelHandle, subscription: Subscription, timeout: Option<Duration>) -> Self {
        let canceled = cancel.0.canceled.subscribe();
        Self {
            cancel,
            subscription,
            canceled,
            timeout,
        }
    }

    /// Key of the request record in the queue log
    pub fn id(&self) -> &str {
        self.cancel.id()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Override the configured timeout for this request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wait for the service's answer
    ///
    /// Responses that do not verify against the queue owner are ignored, so
    /// a third party writing to the record cannot settle the request.
    pub async fn response(self) -> Result<serde_json::Value, QueueError> {
        let PendingRequest {
            cancel,
            mut subscription,
            mut canceled,
            timeout,
        } = self;
        let id = cancel.id().to_string();
        let inflight = &cancel.0;

        let wait = async {
            loop {
                let is_canceled = *canceled.borrow_and_update();
                if is_canceled {
                    return Err(QueueError::Canceled);
                }
                tokio::select! {
                    changed = canceled.changed() => {
                        if changed.is_err() {
                            return Err(QueueError::Canceled);
                        }
                    }
                    event = subscription.next() => {
                        let Some(event) = event else {
                            return Err(StoreError::Default(anyhow::anyhow!("queue subscription closed")).into());
                        };
                        let Some(value) = event.value else {
                            continue;
                        };
                        let record = match serde_json::from_str::<RequestRecord>(&value) {
                            Ok(record) => record,
                            Err(e) => {
                                tracing::warn!(request = %id, "skipping malformed record: {e}");
                                continue;
                            }
                        };
                        let Some(response) = record.response else {
                            continue;
                        };
                        match inflight.ephemeral.shared_verify_and_decrypt::<ResponseBody>(
                            &inflight.owner.sign_pub,
                            &inflight.owner,
                            &response,
                        ) {
                            Ok(ResponseBody::Ok(value)) => return Ok(value),
                            Ok(ResponseBody::Err(message)) => return Err(QueueError::Rejected(message)),
                            Err(e) => {
                                tracing::warn!(request = %id, "ignoring unverifiable response: {e}");
                            }
                        }
                    }
                }
            }
        };

        let settled = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(QueueError::Timeout)),
            None => wait.await,
        };
        tracing::debug!(request = %id, ok = settled.is_ok(), "request settled");
        settled
    }
}
