use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChangeEvent, GraphError, GraphStore, Location, Subscription};

/// In-process graph store
///
/// Single-replica and strongly consistent, except that existence checks
/// can be made to lag behind writes by a fixed delay to reproduce the late
/// visibility of a replicated store.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<Mutex<MemoryGraphInner>>,
    visibility_lag: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryGraphInner {
    leaves: HashMap<String, Leaf>,
    next_seq: u64,
    watchers: Vec<Watcher>,
}

#[derive(Debug)]
struct Leaf {
    value: String,
    /// Insertion order, kept across overwrites
    seq: u64,
    written_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchScope {
    Node,
    Children,
}

#[derive(Debug)]
struct Watcher {
    path: String,
    scope: WatchScope,
    tx: flume::Sender<ChangeEvent>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide fresh writes from `exists` for `lag`
    pub fn with_visibility_lag(lag: Duration) -> Self {
        Self {
            visibility_lag: Some(lag),
            ..Self::default()
        }
    }

    /// Number of live subscriptions, counting only those whose handle is
    /// still held
    pub fn subscription_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|w| !w.tx.is_disconnected());
        inner.watchers.len()
    }

    fn watch(&self, path: &Location, scope: WatchScope) -> Subscription {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock();

        // initial state goes out under the same lock as registration so no
        //  write can slip in between
        match scope {
            WatchScope::Node => {
                if let Some(leaf) = inner.leaves.get(path.as_str()) {
                    let _ = tx.send(ChangeEvent {
                        key: path.key().to_string(),
                        value: Some(leaf.value.clone()),
                    });
                }
            }
            WatchScope::Children => {
                for (key, value) in inner.children_of(path.as_str()) {
                    let _ = tx.send(ChangeEvent {
                        key,
                        value: Some(value),
                    });
                }
            }
        }

        inner.watchers.push(Watcher {
            path: path.as_str().to_string(),
            scope,
            tx,
        });
        Subscription::new(rx)
    }
}

impl MemoryGraphInner {
    fn children_of(&self, path: &str) -> Vec<(String, String)> {
        let prefix = format!("{path}/");
        let mut children: Vec<(u64, String, String)> = self
            .leaves
            .iter()
            .filter_map(|(key, leaf)| {
                let rest = key.strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| (leaf.seq, rest.to_string(), leaf.value.clone()))
            })
            .collect();
        children.sort_by_key(|(seq, _, _)| *seq);
        children
            .into_iter()
            .map(|(_, key, value)| (key, value))
            .collect()
    }

    fn notify(&mut self, path: &str, value: Option<&str>) {
        let (parent, key) = match path.rsplit_once('/') {
            Some((parent, key)) => (Some(parent), key),
            None => (None, path),
        };
        self.watchers.retain(|watcher| {
            let hit = match watcher.scope {
                WatchScope::Node => watcher.path == path,
                WatchScope::Children => Some(watcher.path.as_str()) == parent,
            };
            if !hit {
                return !watcher.tx.is_disconnected();
            }
            watcher
                .tx
                .send(ChangeEvent {
                    key: key.to_string(),
                    value: value.map(str::to_string),
                })
                .is_ok()
        });
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn exists(&self, path: &Location) -> Result<bool, GraphError> {
        let inner = self.inner.lock();
        let prefix = format!("{}/", path.as_str());
        let visible = |leaf: &Leaf| match self.visibility_lag {
            Some(lag) => leaf.written_at.elapsed() >= lag,
            None => true,
        };
        Ok(inner
            .leaves
            .iter()
            .any(|(key, leaf)| (key == path.as_str() || key.starts_with(&prefix)) && visible(leaf)))
    }

    async fn get(&self, path: &Location) -> Result<Option<String>, GraphError> {
        Ok(self
            .inner
            .lock()
            .leaves
            .get(path.as_str())
            .map(|leaf| leaf.value.clone()))
    }

    async fn put(&self, path: &Location, value: String) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let seq = match inner.leaves.get(path.as_str()) {
            Some(existing) => existing.seq,
            None => {
                inner.next_seq += 1;
                inner.next_seq
            }
        };
        inner.leaves.insert(
            path.as_str().to_string(),
            Leaf {
                value: value.clone(),
                seq,
                written_at: Instant::now(),
            },
        );
        inner.notify(path.as_str(), Some(&value));
        Ok(())
    }

    async fn remove(&self, path: &Location) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let prefix = format!("{}/", path.as_str());
        let removed: Vec<String> = inner
            .leaves
            .keys()
            .filter(|key| *key == path.as_str() || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in removed {
            inner.leaves.remove(&key);
            inner.notify(&key, None);
        }
        Ok(())
    }

    async fn children(&self, path: &Location) -> Result<Vec<(String, String)>, GraphError> {
        Ok(self.inner.lock().children_of(path.as_str()))
    }

    fn subscribe(&self, path: &Location) -> Result<Subscription, GraphError> {
        Ok(self.watch(path, WatchScope::Node))
    }

    fn subscribe_map(&self, path: &Location) -> Result<Subscription, GraphError> {
        Ok(self.watch(path, WatchScope::Children))
    }
}
