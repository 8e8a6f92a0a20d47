use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::Identity;

/// Resolves an alias or a signing public key to a known identity
///
/// Results are always public-only references.
#[async_trait]
pub trait IdentityDirectory: Send + Sync + Debug + 'static {
    async fn find(&self, alias_or_pub: &str) -> Option<Identity>;
}

/// In-memory directory keyed by alias and by signing key text
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityDirectory {
    entries: Arc<RwLock<HashMap<String, Identity>>>,
}

impl MemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the public half of `identity`
    pub fn register(&self, identity: &Identity) {
        let mut public = Identity::from_public(*identity.public_keys());
        if let Some(alias) = identity.name() {
            public = public.with_alias(alias);
            self.entries.write().insert(alias.to_string(), public.clone());
        }
        self.entries
            .write()
            .insert(identity.sign_pub().to_base64(), public);
    }
}

#[async_trait]
impl IdentityDirectory for MemoryIdentityDirectory {
    async fn find(&self, alias_or_pub: &str) -> Option<Identity> {
        self.entries.read().get(alias_or_pub).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_find_by_alias_and_key() {
        let directory = MemoryIdentityDirectory::new();
        let alice = Identity::generate().unwrap().with_alias("alice");
        directory.register(&alice);

        let by_alias = directory.find("alice").await.unwrap();
        assert!(by_alias.is_public_only());
        assert!(by_alias.is(alice.public_keys()));

        let by_key = directory
            .find(&alice.sign_pub().to_base64())
            .await
            .unwrap();
        assert_eq!(by_key.alias(), "alice");

        assert!(directory.find("bob").await.is_none());
    }
}
