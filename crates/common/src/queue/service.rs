use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ControlBlock, MemberProof, QueueError, RequestRecord, ResponseBody};
use crate::crypto::{self, PublicKeys};
use crate::graph::{GraphStore, Location, Subscription};
use crate::identity::{Identity, SharedCryptoCapability};
use crate::store::{StoreError, TwinStore};

/// A decrypted request as seen by the service handler
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Key of the request record in the queue log
    pub id: String,
    pub payload: serde_json::Value,
    /// Keys of the requester, when they proved to be a member
    pub member: Option<PublicKeys>,
}

impl ServiceRequest {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug)]
struct SinkInner {
    graph: Arc<dyn GraphStore>,
    path: Location,
    admin: Identity,
    record: RequestRecord,
    settled: AtomicBool,
}

/// Answers one request
///
/// Only the first `send` or `error` is written; later calls are no-ops.
#[derive(Debug, Clone)]
pub struct ResponseSink(Arc<SinkInner>);

impl ResponseSink {
    fn new(graph: Arc<dyn GraphStore>, path: Location, admin: Identity, record: RequestRecord) -> Self {
        Self(Arc::new(SinkInner {
            graph,
            path,
            admin,
            record,
            settled: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> &str {
        self.0.path.key()
    }

    pub async fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), QueueError> {
        self.settle(ResponseBody::Ok(serde_json::to_value(value)?)).await
    }

    pub async fn error(&self, message: impl Into<String>) -> Result<(), QueueError> {
        self.settle(ResponseBody::Err(message.into())).await
    }

    pub fn is_settled(&self) -> bool {
        self.0.settled.load(Ordering::SeqCst)
    }

    async fn settle(&self, body: ResponseBody) -> Result<(), QueueError> {
        if self.0.settled.swap(true, Ordering::SeqCst) {
            tracing::debug!(request = %self.id(), "request already answered");
            return Ok(());
        }
        let inner = &self.0;
        // keep whatever control block is current
        let mut record = inner
            .graph
            .get(&inner.path)
            .await?
            .and_then(|value| serde_json::from_str::<RequestRecord>(&value).ok())
            .unwrap_or_else(|| inner.record.clone());
        record.response = Some(inner.admin.shared_encrypt_and_sign(&inner.record.keys, &body)?);
        inner
            .graph
            .put(&inner.path, serde_json::to_string(&record)?)
            .await?;
        tracing::debug!(request = %self.id(), ok = matches!(body, ResponseBody::Ok(_)), "answered request");
        Ok(())
    }
}

/// Follows the queue log and dispatches requests to the handler
pub(super) struct Worker<F> {
    graph: Arc<dyn GraphStore>,
    log: Location,
    admin: Identity,
    twin: TwinStore,
    only_members: Arc<AtomicBool>,
    handler: Arc<F>,
    handled: HashSet<String>,
}

impl<F, Fut> Worker<F>
where
    F: Fn(ServiceRequest, ResponseSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub(super) fn new(
        twin: TwinStore,
        log: Location,
        only_members: Arc<AtomicBool>,
        handler: F,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            graph: twin.context().graph().clone(),
            admin: twin.identity()?.clone(),
            log,
            twin,
            only_members,
            handler: Arc::new(handler),
            handled: HashSet::new(),
        })
    }

    pub(super) async fn run(mut self, mut subscription: Subscription) {
        while let Some(event) = subscription.next().await {
            let Some(value) = event.value else {
                self.handled.remove(&event.key);
                continue;
            };
            if self.handled.contains(&event.key) {
                continue;
            }
            if let Err(e) = self.accept(&event.key, &value).await {
                tracing::warn!(request = %event.key, "failed to accept request: {e}");
            }
        }
        tracing::debug!(log = %self.log, "queue log closed, service stopped");
    }

    async fn accept(&mut self, id: &str, value: &str) -> Result<(), QueueError> {
        let record = match serde_json::from_str::<RequestRecord>(value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(request = %id, "skipping malformed record: {e}");
                return Ok(());
            }
        };
        if record.response.is_some() {
            return Ok(());
        }

        let requester = record.keys;
        let ctrl = match record.ctrl.as_deref() {
            Some(ctrl) => match self.admin.shared_verify_and_decrypt::<ControlBlock>(
                &requester.sign_pub,
                &requester,
                ctrl,
            ) {
                Ok(ctrl) => ctrl,
                Err(e) => {
                    tracing::warn!(request = %id, "ignoring unreadable control block: {e}");
                    ControlBlock::default()
                }
            },
            None => ControlBlock::default(),
        };
        if ctrl.canceled {
            tracing::debug!(request = %id, "skipping canceled request");
            return Ok(());
        }

        let payload = match self.admin.shared_verify_and_decrypt::<serde_json::Value>(
            &requester.sign_pub,
            &requester,
            &record.payload,
        ) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(request = %id, "skipping undecryptable request: {e}");
                return Ok(());
            }
        };
        self.handled.insert(id.to_string());

        let sink = ResponseSink::new(
            self.graph.clone(),
            self.log.child(id),
            self.admin.clone(),
            record.clone(),
        );

        let member = match ctrl.member {
            Some(proof) => match self.check_member(&record, &proof).await {
                Ok(member) => member,
                Err(e) => {
                    tracing::error!(request = %id, "membership check failed: {e}");
                    return sink.error("membership check failed").await;
                }
            },
            None => None,
        };
        if self.only_members.load(Ordering::SeqCst) && member.is_none() {
            tracing::info!(request = %id, "rejecting request from non-member");
            return sink.error("no permission").await;
        }

        let request = ServiceRequest {
            id: id.to_string(),
            payload,
            member,
        };
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let task_sink = sink.clone();
            let outcome = tokio::spawn(async move { (*handler)(request, task_sink).await }).await;
            let answered = match outcome {
                Ok(Ok(())) => {
                    if !sink.is_settled() {
                        tracing::debug!(request = %sink.id(), "handler left the request open");
                    }
                    Ok(())
                }
                Ok(Err(e)) => {
                    tracing::error!(request = %sink.id(), "request handler failed: {e}");
                    sink.error(e.to_string()).await
                }
                Err(e) => {
                    tracing::error!(request = %sink.id(), "request handler panicked: {e}");
                    sink.error("handler panicked").await
                }
            };
            if let Err(e) = answered {
                tracing::error!(request = %sink.id(), "failed to write response: {e}");
            }
        });
        Ok(())
    }

    /// Keys of the claimed member, if the claim holds
    ///
    /// The proof must be the member's signature over this request's
    /// ephemeral signing key, and the member must have an entry.
    async fn check_member(
        &self,
        record: &RequestRecord,
        proof: &MemberProof,
    ) -> Result<Option<PublicKeys>, QueueError> {
        let signed_for = crypto::verify(&proof.proof, &proof.keys.sign_pub).ok();
        if signed_for.as_deref() != Some(record.keys.sign_pub.to_base64().as_str()) {
            tracing::warn!("membership proof does not cover this request");
            return Ok(None);
        }
        if !self.twin.verify_member(&proof.keys).await? {
            return Ok(None);
        }
        Ok(Some(proof.keys))
    }
}
