use std::sync::Arc;

use super::StoreError;
use crate::config::Config;
use crate::graph::GraphStore;
use crate::identity::{Identity, IdentityDirectory};

/// Everything a store needs from its surroundings
///
/// Cheap to clone; clones share the same graph and directory. Parties in
/// the same process get their own context by cloning and swapping the
/// identity.
#[derive(Debug, Clone)]
pub struct Context {
    graph: Arc<dyn GraphStore>,
    directory: Option<Arc<dyn IdentityDirectory>>,
    identity: Option<Identity>,
    config: Config,
}

impl Context {
    pub fn new(graph: impl GraphStore) -> Self {
        Self::from_shared(Arc::new(graph))
    }

    pub fn from_shared(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            directory: None,
            identity: None,
            config: Config::default(),
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn without_identity(mut self) -> Self {
        self.identity = None;
        self
    }

    pub fn with_directory(mut self, directory: impl IdentityDirectory) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Identity used by stores that were not signed on explicitly
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve an alias or signing key through the directory
    pub async fn find_identity(&self, query: &str) -> Result<Identity, StoreError> {
        let Some(directory) = &self.directory else {
            return Err(StoreError::IdentityNotFound(query.to_string()));
        };
        directory
            .find(query)
            .await
            .ok_or_else(|| StoreError::IdentityNotFound(query.to_string()))
    }
}
