use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

pub type ListenerId = u64;

/// Fan-out of store events to user callbacks
///
/// Each listener owns a channel and a task and sees events in arrival
/// order. A failing or panicking listener is logged and keeps running.
#[derive(Debug)]
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenersInner<T>>>,
}

#[derive(Debug)]
struct ListenersInner<T> {
    next_id: ListenerId,
    senders: Vec<(ListenerId, flume::Sender<T>)>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenersInner {
                next_id: 0,
                senders: Vec::new(),
            })),
        }
    }
}

impl<T> Listeners<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a worker for `listener` and return its handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn register<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (tx, rx) = flume::unbounded::<T>();
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.senders.push((id, tx));
            id
        };

        tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                // the closure itself may panic before handing back its future
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                    Ok(run) => AssertUnwindSafe(run).catch_unwind().await,
                    Err(panicked) => Err(panicked),
                };
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(listener = id, "listener failed: {e}"),
                    Err(_) => tracing::error!(listener = id, "listener panicked"),
                }
            }
            tracing::trace!(listener = id, "listener detached");
        });
        id
    }

    /// Detach a listener, returns false if it was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.senders.len();
        inner.senders.retain(|(existing, _)| *existing != id);
        inner.senders.len() != before
    }

    pub fn dispatch(&self, event: T) {
        self.inner
            .lock()
            .senders
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().senders.clear();
    }
}
