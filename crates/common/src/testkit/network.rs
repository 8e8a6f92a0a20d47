use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use super::party::TestParty;
use crate::config::Config;
use crate::graph::{GraphStore, Location, MemoryGraph};
use crate::identity::MemoryIdentityDirectory;
use crate::store::Context;

/// A coordinator for multiple test parties
///
/// TestNetwork owns the shared graph and directory and provides utilities
/// for eventual consistency testing.
#[derive(Debug)]
pub struct TestNetwork {
    graph: MemoryGraph,
    directory: MemoryIdentityDirectory,
    config: Config,
    /// All parties, indexed by name
    parties: HashMap<String, TestParty>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_graph(MemoryGraph::new())
    }

    /// A network whose writes become visible to readers after `lag`
    pub fn with_visibility_lag(lag: Duration) -> Self {
        Self::with_graph(MemoryGraph::with_visibility_lag(lag))
    }

    fn with_graph(graph: MemoryGraph) -> Self {
        Self {
            graph,
            directory: MemoryIdentityDirectory::new(),
            config: Config::default(),
            parties: HashMap::new(),
        }
    }

    /// Use `config` for every party added afterwards
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Add a party with a fresh identity aliased `name`
    ///
    /// The identity is registered in the shared directory, so other parties
    /// can invite it by name.
    pub fn add_party(&mut self, name: impl Into<String>) -> Result<&TestParty> {
        let name = name.into();
        if self.parties.contains_key(&name) {
            return Err(anyhow::anyhow!("Party '{}' already exists", name));
        }

        let graph: Arc<dyn GraphStore> = Arc::new(self.graph.clone());
        let party = TestParty::new(
            name.clone(),
            graph,
            self.directory.clone(),
            self.config.clone(),
        )?;
        tracing::debug!(%name, "added test party");
        Ok(self.parties.entry(name).or_insert(party))
    }

    pub fn party(&self, name: &str) -> Result<&TestParty> {
        self.parties
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Party '{}' does not exist", name))
    }

    /// A context signed on as `name`
    pub fn context(&self, name: &str) -> Result<Context> {
        Ok(self.party(name)?.context())
    }

    /// A context with no identity
    pub fn anonymous_context(&self) -> Context {
        Context::from_shared(Arc::new(self.graph.clone()))
            .with_directory(self.directory.clone())
            .with_config(self.config.clone())
    }

    pub fn graph(&self) -> &MemoryGraph {
        &self.graph
    }

    /// A fresh store location
    pub fn location(&self) -> Result<Location> {
        Ok(Location::random()?)
    }

    pub fn party_names(&self) -> Vec<String> {
        self.parties.keys().cloned().collect()
    }

    /// Poll a condition until it succeeds or times out
    ///
    /// Useful for waiting on live subscriptions and listeners.
    ///
    /// # Example
    /// ```rust,ignore
    /// net.eventually(Duration::from_secs(2), || async {
    ///     Ok(seen.lock().len() == 2)
    /// }).await?;
    /// ```
    pub async fn eventually<F, Fut>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            match condition().await {
                Ok(true) => {
                    tracing::debug!("Eventual condition met after {:?}", start.elapsed());
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!("Eventual condition check error: {}", e);
                }
            }

            if start.elapsed() > timeout {
                return Err(anyhow::anyhow!(
                    "Condition not met within timeout ({:?})",
                    timeout
                ));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parties() -> Result<()> {
        let mut net = TestNetwork::new();
        net.add_party("alice")?;
        net.add_party("bob")?;
        assert!(net.add_party("alice").is_err());

        assert_eq!(net.party_names().len(), 2);
        let alice = net.party("alice")?;
        assert_eq!(alice.identity().name(), Some("alice"));
        assert!(net.party("carol").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_parties_share_graph() -> Result<()> {
        let mut net = TestNetwork::new();
        net.add_party("alice")?;
        net.add_party("bob")?;

        let path = net.location()?;
        net.context("alice")?
            .graph()
            .put(&path, "hello".into())
            .await?;
        let seen = net.context("bob")?.graph().get(&path).await?;
        assert_eq!(seen.as_deref(), Some("hello"));
        Ok(())
    }

    #[tokio::test]
    async fn test_directory_lookup() -> Result<()> {
        let mut net = TestNetwork::new();
        let bob = net.add_party("bob")?.identity().clone();

        let found = net.context("bob")?.find_identity("bob").await?;
        assert!(found.is(bob.public_keys()));
        Ok(())
    }

    #[tokio::test]
    async fn test_eventually_success() -> Result<()> {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let net = TestNetwork::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        net.eventually(Duration::from_secs(1), move || {
            let count = count_clone.clone();
            async move {
                let val = count.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(val >= 3)
            }
        })
        .await?;

        assert!(count.load(Ordering::SeqCst) >= 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_eventually_timeout() {
        let net = TestNetwork::new();

        let result = net
            .eventually(Duration::from_millis(100), || async { Ok(false) })
            .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("timeout"));
    }
}
