use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::graph::GraphStore;
use crate::identity::{Identity, MemoryIdentityDirectory};
use crate::store::Context;

/// One named participant of a [`TestNetwork`](super::TestNetwork)
#[derive(Debug, Clone)]
pub struct TestParty {
    name: String,
    identity: Identity,
    graph: Arc<dyn GraphStore>,
    directory: MemoryIdentityDirectory,
    config: Config,
}

impl TestParty {
    pub(super) fn new(
        name: String,
        graph: Arc<dyn GraphStore>,
        directory: MemoryIdentityDirectory,
        config: Config,
    ) -> Result<Self> {
        let identity = Identity::generate()?.with_alias(name.clone());
        directory.register(&identity);
        Ok(Self {
            name,
            identity,
            graph,
            directory,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// A context signed on as this party
    pub fn context(&self) -> Context {
        self.anonymous_context().with_identity(self.identity.clone())
    }

    /// A context on the same graph with no identity
    pub fn anonymous_context(&self) -> Context {
        Context::from_shared(self.graph.clone())
            .with_directory(self.directory.clone())
            .with_config(self.config.clone())
    }
}
