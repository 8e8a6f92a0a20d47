//! Integration tests for shared store lifecycle and membership

mod common;

use std::time::Duration;

use ::common::config::Config;
use ::common::graph::{GraphStore, Location};
use ::common::store::{ObjectStore, SharedStore, StoreError, StoreState};
use ::common::testkit::TestNetwork;

async fn created(net: &TestNetwork, owner: &str) -> (SharedStore, Location) {
    let location = net.location().unwrap();
    let mut store = SharedStore::at(net.context(owner).unwrap(), location.clone());
    store.create().await.unwrap();
    (store, location)
}

#[tokio::test]
async fn test_create_and_read_back() {
    let net = common::setup_network(&["alice"]);
    let (mut store, location) = created(&net, "alice").await;

    assert_eq!(store.state(), StoreState::Established);
    assert!(store.is_admin());
    assert!(store.can_write());
    assert!(store.exists().await.unwrap());

    store.put("greeting", "hello").await.unwrap();
    assert_eq!(
        store.get::<String>("greeting").await.unwrap().as_deref(),
        Some("hello")
    );

    // a fresh handle for the same identity unlocks from its member entry
    let mut again = SharedStore::at(net.context("alice").unwrap(), location);
    again.join(None).await.unwrap();
    assert!(again.is_admin());
    assert_eq!(
        again.get::<String>("greeting").await.unwrap().as_deref(),
        Some("hello")
    );
}

#[tokio::test]
async fn test_create_twice_fails() {
    let net = common::setup_network(&["alice", "bob"]);
    let (_store, location) = created(&net, "alice").await;

    let mut other = SharedStore::at(net.context("bob").unwrap(), location);
    assert!(matches!(other.create().await, Err(StoreError::StoreExists)));
}

#[tokio::test]
async fn test_create_if_missing() {
    let net = common::setup_network(&["alice"]);
    let location = net.location().unwrap();

    let mut first = SharedStore::at(net.context("alice").unwrap(), location.clone());
    first.create_if_missing().await.unwrap();
    first.put("n", &1).await.unwrap();

    let mut second = SharedStore::at(net.context("alice").unwrap(), location);
    second.create_if_missing().await.unwrap();
    assert_eq!(second.get::<i32>("n").await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_requires_identity_and_location() {
    let net = common::setup_network(&["alice"]);

    let mut anonymous = SharedStore::at(net.anonymous_context(), net.location().unwrap());
    assert!(matches!(anonymous.create().await, Err(StoreError::NotAuthenticated)));

    let mut unbound = SharedStore::new(net.context("alice").unwrap());
    assert!(matches!(unbound.create().await, Err(StoreError::NoLocation)));
}

#[tokio::test]
async fn test_unlock_missing_store() {
    let net = common::setup_network(&["alice"]);
    let mut store = SharedStore::at(net.context("alice").unwrap(), net.location().unwrap());
    assert!(matches!(store.unlock().await, Err(StoreError::StoreExistsNot)));
}

#[tokio::test]
async fn test_invite_join_and_revoke() {
    let net = common::setup_network(&["alice", "bob"]);
    let (mut store, location) = created(&net, "alice").await;
    store.put("plan", "launch").await.unwrap();

    let mut bob = SharedStore::at(net.context("bob").unwrap(), location.clone());
    assert!(matches!(bob.join(None).await, Err(StoreError::NoPermission)));
    // a refused join leaves the handle where it was
    assert_eq!(bob.state(), StoreState::Bound);
    assert!(!bob.is_unlocked());

    store.invite("bob", false).await.unwrap();
    assert!(store.is_member("bob").await.unwrap());

    let mut bob = SharedStore::at(net.context("bob").unwrap(), location.clone());
    bob.join(None).await.unwrap();
    assert!(!bob.is_admin());
    assert!(!bob.can_write());
    assert_eq!(
        bob.get::<String>("plan").await.unwrap().as_deref(),
        Some("launch")
    );
    assert!(matches!(bob.put("plan", "abort").await, Err(StoreError::NoPermission)));
    assert!(matches!(bob.invite("alice", false).await, Err(StoreError::NoPermission)));

    store.revoke("bob").await.unwrap();
    assert!(!store.is_member("bob").await.unwrap());
    let mut bob = SharedStore::at(net.context("bob").unwrap(), location.clone());
    assert!(matches!(bob.join(None).await, Err(StoreError::NoPermission)));

    store.invite("bob", false).await.unwrap();
    let mut bob = SharedStore::at(net.context("bob").unwrap(), location);
    bob.join(None).await.unwrap();
}

#[tokio::test]
async fn test_reinvite_is_noop() {
    let net = common::setup_network(&["alice", "bob"]);
    let (mut store, _) = created(&net, "alice").await;

    store.invite("bob", false).await.unwrap();
    store.invite("bob", true).await.unwrap();
    // the second invite did not upgrade the entry
    let mut bob = SharedStore::at(net.context("bob").unwrap(), store.location().unwrap().clone());
    bob.join(None).await.unwrap();
    assert!(!bob.can_write());
}

#[tokio::test]
async fn test_invite_by_keys_and_unknown_alias() {
    let net = common::setup_network(&["alice", "bob"]);
    let (mut store, location) = created(&net, "alice").await;

    let bob = net.party("bob").unwrap().identity().clone();
    store.invite(*bob.public_keys(), false).await.unwrap();
    let mut joined = SharedStore::at(net.context("bob").unwrap(), location);
    joined.join(None).await.unwrap();

    assert!(matches!(
        store.invite("nobody", false).await,
        Err(StoreError::IdentityNotFound(_))
    ));
}

#[tokio::test]
async fn test_grant_and_revoke_write() {
    let net = common::setup_network(&["alice", "bob"]);
    let (mut store, location) = created(&net, "alice").await;
    store.invite("bob", false).await.unwrap();

    store.grant_write("bob").await.unwrap();
    let mut bob = SharedStore::at(net.context("bob").unwrap(), location.clone());
    bob.join(None).await.unwrap();
    assert!(bob.can_write());
    bob.put("note", "from bob").await.unwrap();
    assert_eq!(
        store.get::<String>("note").await.unwrap().as_deref(),
        Some("from bob")
    );

    store.revoke_write("bob").await.unwrap();
    let mut bob = SharedStore::at(net.context("bob").unwrap(), location);
    bob.join(None).await.unwrap();
    assert!(!bob.can_write());
    assert!(matches!(bob.put("note", "again").await, Err(StoreError::NoPermission)));
}

#[tokio::test]
async fn test_grant_write_needs_entry() {
    let net = common::setup_network(&["alice", "bob"]);
    let (mut store, _) = created(&net, "alice").await;
    assert!(matches!(
        store.grant_write("bob").await,
        Err(StoreError::IdentityNotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_writes_tombstone() {
    let net = common::setup_network(&["alice"]);
    let (mut store, _) = created(&net, "alice").await;

    store.put("gone", &42).await.unwrap();
    store.remove("gone").await.unwrap();
    assert_eq!(store.get::<i32>("gone").await.unwrap(), None);

    // the entry still occupies its slot in the content area
    let hash = store.key_hash("gone").unwrap();
    let path = store.location().unwrap().child("content").child(hash);
    assert!(net.graph().get(&path).await.unwrap().is_some());
}

#[tokio::test]
async fn test_content_is_opaque() {
    let net = common::setup_network(&["alice"]);
    let (mut store, location) = created(&net, "alice").await;
    store.put("secret-key", "secret-value").await.unwrap();

    let content = net
        .graph()
        .children(&location.child("content"))
        .await
        .unwrap();
    assert_eq!(content.len(), 1);
    let (hash, sealed) = &content[0];
    assert!(!hash.contains("secret-key"));
    assert!(!sealed.contains("secret-value"));
}

#[tokio::test]
async fn test_ghost_access() {
    let net = common::setup_network(&["alice", "carol"]);
    let (mut store, location) = created(&net, "alice").await;
    store.put("public", "notice").await.unwrap();
    store.with_ghost(false).await.unwrap();

    let mut visitor = SharedStore::at(net.context("carol").unwrap(), location.clone());
    visitor.join_as_ghost().await.unwrap();
    assert_eq!(
        visitor.get::<String>("public").await.unwrap().as_deref(),
        Some("notice")
    );
    assert!(matches!(visitor.put("public", "defaced").await, Err(StoreError::NoPermission)));

    let mut anonymous = SharedStore::at(net.anonymous_context(), location);
    anonymous.join_as_ghost().await.unwrap();
    assert!(anonymous.get::<String>("public").await.unwrap().is_some());
}

#[tokio::test]
async fn test_join_as_ghost_without_ghost() {
    let net = common::setup_network(&["alice", "carol"]);
    let (_store, location) = created(&net, "alice").await;

    let mut visitor = SharedStore::at(net.context("carol").unwrap(), location);
    assert!(matches!(visitor.join_as_ghost().await, Err(StoreError::NoPermission)));
}

#[tokio::test]
async fn test_leave_forgets_membership() {
    let net = common::setup_network(&["alice"]);
    let (mut store, _) = created(&net, "alice").await;

    store.leave();
    assert_eq!(store.state(), StoreState::Bound);
    assert!(!store.is_unlocked());
    store.unlock().await.unwrap();
    assert!(store.is_unlocked());
}

#[tokio::test]
async fn test_exists_tolerates_visibility_lag() {
    common::init_tracing();
    let mut net = TestNetwork::with_visibility_lag(Duration::from_millis(20)).with_config(Config {
        visibility_retry_ms: 100,
        ..Config::default()
    });
    net.add_party("alice").unwrap();
    net.add_party("bob").unwrap();

    let location = net.location().unwrap();
    let mut store = SharedStore::at(net.context("alice").unwrap(), location.clone());
    store.create().await.unwrap();

    let observer = SharedStore::at(net.context("bob").unwrap(), location);
    assert!(observer.exists().await.unwrap());
}

#[tokio::test]
async fn test_tampered_content_is_rejected() {
    let net = common::setup_network(&["alice"]);
    let (mut store, location) = created(&net, "alice").await;
    store.put("k", "original").await.unwrap();
    store.put("other", "kept").await.unwrap();

    let path = location.child("content").child(store.key_hash("k").unwrap());
    let sealed = net.graph().get(&path).await.unwrap().unwrap();
    // change one character of the ciphertext inside the signed wrapper
    let at = sealed.find("ct").unwrap() + 10;
    let mut bytes = sealed.into_bytes();
    bytes[at] = if bytes[at] == b'A' { b'B' } else { b'A' };
    net.graph()
        .put(&path, String::from_utf8(bytes).unwrap())
        .await
        .unwrap();

    assert!(matches!(
        store.get::<String>("k").await,
        Err(StoreError::CantDecrypt)
    ));
    assert_eq!(
        store.get::<String>("other").await.unwrap().as_deref(),
        Some("kept")
    );

    let mut objects = ObjectStore::at(net.context("alice").unwrap(), location);
    objects.join(None).await.unwrap();
    let keys: Vec<String> = objects
        .entries()
        .await
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec!["other".to_string()]);
}
