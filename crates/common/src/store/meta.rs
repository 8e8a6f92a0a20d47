use serde::{Deserialize, Serialize};

use super::{Context, StoreError};
use crate::crypto::{KeyPairSet, PublicKeys, Secret, SignPublicKey};
use crate::graph::{GraphStore, Location};
use crate::identity::Identity;

/// Layout of a store under its location
pub(crate) mod paths {
    use crate::graph::Location;

    pub fn meta(root: &Location) -> Location {
        root.child("meta")
    }

    pub fn owner(root: &Location) -> Location {
        meta(root).child("owner")
    }

    pub fn write(root: &Location) -> Location {
        meta(root).child("write")
    }

    pub fn salt(root: &Location) -> Location {
        meta(root).child("salt")
    }

    pub fn ghost(root: &Location) -> Location {
        meta(root).child("ghost")
    }

    pub fn policy(root: &Location) -> Location {
        meta(root).child("policy")
    }

    pub fn members(root: &Location) -> Location {
        meta(root).child("members")
    }

    pub fn member(root: &Location, idhash: &str) -> Location {
        members(root).child(idhash)
    }

    pub fn content(root: &Location) -> Location {
        root.child("content")
    }

    pub fn channel(root: &Location) -> Location {
        root.child("channel")
    }

    pub fn queue(root: &Location) -> Location {
        root.child("queue")
    }
}

/// Policy value marking a store that only serves its members
const MEMBERS_ONLY_POLICY: &str = "members";

/// Public metadata of a store
///
/// Written once by `create()`. The salt never changes afterwards, since
/// every member address and content key is derived from it.
#[derive(Debug, Clone)]
pub struct StoreMeta {
    pub owner: PublicKeys,
    pub write: Option<PublicKeys>,
    pub salt: String,
    pub ghost: Option<KeyPairSet>,
    pub only_members: bool,
}

impl StoreMeta {
    /// Read the metadata under `root`, `None` if no owner was ever written
    pub(crate) async fn load(
        graph: &dyn GraphStore,
        root: &Location,
    ) -> Result<Option<Self>, StoreError> {
        let Some(owner) = graph.get(&paths::owner(root)).await? else {
            return Ok(None);
        };
        let owner: PublicKeys = serde_json::from_str(&owner)?;
        let write = match graph.get(&paths::write(root)).await? {
            Some(write) => Some(serde_json::from_str(&write)?),
            None => None,
        };
        let salt = graph
            .get(&paths::salt(root))
            .await?
            .ok_or_else(|| anyhow::anyhow!("store at {root} has an owner but no salt"))?;
        let ghost = match graph.get(&paths::ghost(root)).await? {
            Some(ghost) => Some(serde_json::from_str(&ghost)?),
            None => None,
        };
        let only_members = graph
            .get(&paths::policy(root))
            .await?
            .is_some_and(|policy| policy == MEMBERS_ONLY_POLICY);

        Ok(Some(Self {
            owner,
            write,
            salt,
            ghost,
            only_members,
        }))
    }

    pub(crate) async fn save(&self, graph: &dyn GraphStore, root: &Location) -> Result<(), StoreError> {
        // salt before owner: a reader that sees the owner must find a salt
        graph.put(&paths::salt(root), self.salt.clone()).await?;
        if let Some(write) = &self.write {
            graph
                .put(&paths::write(root), serde_json::to_string(write)?)
                .await?;
        }
        if let Some(ghost) = &self.ghost {
            graph
                .put(&paths::ghost(root), serde_json::to_string(ghost)?)
                .await?;
        }
        if self.only_members {
            graph
                .put(&paths::policy(root), MEMBERS_ONLY_POLICY.to_string())
                .await?;
        }
        graph
            .put(&paths::owner(root), serde_json::to_string(&self.owner)?)
            .await?;
        Ok(())
    }

    pub(crate) async fn save_policy(
        graph: &dyn GraphStore,
        root: &Location,
        only_members: bool,
    ) -> Result<(), StoreError> {
        if only_members {
            graph
                .put(&paths::policy(root), MEMBERS_ONLY_POLICY.to_string())
                .await?;
        } else {
            graph.remove(&paths::policy(root)).await?;
        }
        Ok(())
    }
}

/// What a member learns when opening their entry
///
/// `shared_key` is absent for correspondents of a two-party store.
/// `owner_pair` makes the member an administrator, `write_pair` lets them
/// sign content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEntry {
    pub alias: String,
    pub sign_pub: SignPublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_key: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pair: Option<KeyPairSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_pair: Option<KeyPairSet>,
}

/// Who to invite, revoke or re-key
#[derive(Debug, Clone)]
pub enum Invitee {
    Keys {
        keys: PublicKeys,
        alias: Option<String>,
    },
    /// Alias or signing key text, resolved through the identity directory
    Lookup(String),
}

impl Invitee {
    pub(crate) async fn resolve(self, ctx: &Context) -> Result<Identity, StoreError> {
        match self {
            Invitee::Keys { keys, alias } => {
                let identity = Identity::from_public(keys);
                Ok(match alias {
                    Some(alias) => identity.with_alias(alias),
                    None => identity,
                })
            }
            Invitee::Lookup(query) => ctx.find_identity(&query).await,
        }
    }
}

impl From<&Identity> for Invitee {
    fn from(identity: &Identity) -> Self {
        Invitee::Keys {
            keys: *identity.public_keys(),
            alias: identity.name().map(str::to_string),
        }
    }
}

impl From<PublicKeys> for Invitee {
    fn from(keys: PublicKeys) -> Self {
        Invitee::Keys { keys, alias: None }
    }
}

impl From<&str> for Invitee {
    fn from(query: &str) -> Self {
        Invitee::Lookup(query.to_string())
    }
}

impl From<String> for Invitee {
    fn from(query: String) -> Self {
        Invitee::Lookup(query)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::MemoryGraph;

    #[tokio::test]
    async fn test_meta_round_trip() {
        let graph = MemoryGraph::new();
        let root = Location::new("store").unwrap();
        assert!(StoreMeta::load(&graph, &root).await.unwrap().is_none());

        let owner = Identity::generate().unwrap();
        let meta = StoreMeta {
            owner: *owner.public_keys(),
            write: None,
            salt: "pepper".into(),
            ghost: None,
            only_members: true,
        };
        meta.save(&graph, &root).await.unwrap();

        let loaded = StoreMeta::load(&graph, &root).await.unwrap().unwrap();
        assert_eq!(loaded.owner, meta.owner);
        assert_eq!(loaded.salt, "pepper");
        assert!(loaded.write.is_none());
        assert!(loaded.only_members);

        StoreMeta::save_policy(&graph, &root, false).await.unwrap();
        let loaded = StoreMeta::load(&graph, &root).await.unwrap().unwrap();
        assert!(!loaded.only_members);
    }

    #[test]
    fn test_member_entry_omits_absent_keys() {
        let identity = Identity::generate().unwrap();
        let entry = MemberEntry {
            alias: "bob".into(),
            sign_pub: *identity.sign_pub(),
            shared_key: None,
            owner_pair: None,
            write_pair: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["alias"], "bob");
        assert!(json.get("signPub").is_some());
        assert!(json.get("sharedKey").is_none());
    }
}
