use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::VaultError;
use crate::graph::{GraphStore, Location};

/// Where a vault keeps its sealed payload
///
/// The payload is a single opaque string; backends never see plaintext.
#[async_trait]
pub trait VaultStore: Send + Sync + Debug {
    /// The stored payload, `None` if nothing was written yet
    async fn read(&self) -> Result<Option<String>, VaultError>;

    async fn write(&self, payload: &str) -> Result<(), VaultError>;
}

/// Keeps the payload in memory; clones share it
#[derive(Debug, Clone, Default)]
pub struct MemoryVaultStore {
    content: Arc<Mutex<Option<String>>>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn read(&self) -> Result<Option<String>, VaultError> {
        Ok(self.content.lock().clone())
    }

    async fn write(&self, payload: &str) -> Result<(), VaultError> {
        *self.content.lock() = Some(payload.to_string());
        Ok(())
    }
}

/// Keeps the payload in a file
#[derive(Debug, Clone)]
pub struct FileVaultStore {
    path: PathBuf,
}

impl FileVaultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VaultStore for FileVaultStore {
    async fn read(&self) -> Result<Option<String>, VaultError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, payload: &str) -> Result<(), VaultError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, payload).await?;
        Ok(())
    }
}

/// Keeps the payload in a graph node
#[derive(Debug, Clone)]
pub struct GraphVaultStore {
    graph: Arc<dyn GraphStore>,
    location: Location,
}

impl GraphVaultStore {
    pub fn new(graph: Arc<dyn GraphStore>, location: Location) -> Self {
        Self { graph, location }
    }
}

#[async_trait]
impl VaultStore for GraphVaultStore {
    async fn read(&self) -> Result<Option<String>, VaultError> {
        Ok(self.graph.get(&self.location).await?)
    }

    async fn write(&self, payload: &str) -> Result<(), VaultError> {
        self.graph.put(&self.location, payload.to_string()).await?;
        Ok(())
    }
}
