//! Integration tests for object stores: nesting, tombstones and listeners

mod common;

use std::sync::Arc;

use ::common::graph::GraphStore;
use ::common::store::{ObjectChange, ObjectStore, ObjectValue, StoreError};
use parking_lot::Mutex;
use serde_json::json;

#[tokio::test]
async fn test_literal_values() {
    let net = common::setup_network(&["alice"]);
    let mut store = ObjectStore::at(net.context("alice").unwrap(), net.location().unwrap());
    store.create().await.unwrap();

    store.put("title", "notes").await.unwrap();
    store.put("count", &3).await.unwrap();

    assert_eq!(
        store.get("title").await.unwrap(),
        Some(ObjectValue::Literal(json!("notes")))
    );
    assert_eq!(store.get_as::<u32>("count").await.unwrap(), Some(3));
    assert_eq!(store.get("missing").await.unwrap(), None);

    let keys: Vec<String> = store
        .entries()
        .await
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys, vec!["title".to_string(), "count".to_string()]);
}

#[tokio::test]
async fn test_nested_objects() {
    let net = common::setup_network(&["alice", "bob"]);
    let location = net.location().unwrap();
    let mut root = ObjectStore::at(net.context("alice").unwrap(), location.clone());
    root.create().await.unwrap();

    let mut child = root.add_object("child").await.unwrap();
    child.put("depth", &1).await.unwrap();
    assert!(matches!(
        root.get("child").await.unwrap(),
        Some(ObjectValue::StoreRef(_))
    ));

    let mut resolved = root.get_object("child").await.unwrap().unwrap();
    assert_eq!(resolved.get_as::<u32>("depth").await.unwrap(), Some(1));
    assert_eq!(resolved.location().unwrap(), child.location().unwrap());

    // membership of the parent does not extend to the child
    root.invite("bob", false).await.unwrap();
    let mut bob_root = ObjectStore::at(net.context("bob").unwrap(), location);
    bob_root.join(None).await.unwrap();
    assert!(matches!(
        bob_root.get_object("child").await,
        Err(StoreError::NoPermission)
    ));

    child.invite("bob", false).await.unwrap();
    let mut bob_child = bob_root.get_object("child").await.unwrap().unwrap();
    assert_eq!(bob_child.get_as::<u32>("depth").await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_get_object_on_literal() {
    let net = common::setup_network(&["alice"]);
    let mut store = ObjectStore::at(net.context("alice").unwrap(), net.location().unwrap());
    store.create().await.unwrap();
    store.put("plain", "text").await.unwrap();

    assert!(matches!(
        store.get_object("plain").await,
        Err(StoreError::NotAReference(_))
    ));
    assert!(store.get_object("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_remove_hides_entry() {
    let net = common::setup_network(&["alice"]);
    let mut store = ObjectStore::at(net.context("alice").unwrap(), net.location().unwrap());
    store.create().await.unwrap();

    store.put("a", &1).await.unwrap();
    store.put("b", &2).await.unwrap();
    store.remove("a").await.unwrap();

    assert_eq!(store.get("a").await.unwrap(), None);
    let entries = store.entries().await.unwrap();
    assert_eq!(entries, vec![("b".to_string(), ObjectValue::Literal(json!(2)))]);
}

#[tokio::test]
async fn test_entries_skip_unreadable() {
    let net = common::setup_network(&["alice"]);
    let location = net.location().unwrap();
    let mut store = ObjectStore::at(net.context("alice").unwrap(), location.clone());
    store.create().await.unwrap();
    store.put("good", &true).await.unwrap();

    net.graph()
        .put(&location.child("content").child("forged"), "@SEA{}".into())
        .await
        .unwrap();

    let entries = store.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "good");
}

#[tokio::test]
async fn test_key_listener() {
    let net = common::setup_network(&["alice"]);
    let mut store = ObjectStore::at(net.context("alice").unwrap(), net.location().unwrap());
    store.create().await.unwrap();

    let seen: Arc<Mutex<Vec<Option<ObjectValue>>>> = Arc::default();
    let sink = seen.clone();
    store.on("watched", move |value| {
        let sink = sink.clone();
        async move {
            sink.lock().push(value);
            Ok(())
        }
    });

    store.put("other", &0).await.unwrap();
    store.put("watched", &1).await.unwrap();
    store.remove("watched").await.unwrap();

    net.eventually(common::WAIT, || async { Ok(seen.lock().len() == 2) })
        .await
        .unwrap();
    assert_eq!(
        *seen.lock(),
        vec![Some(ObjectValue::Literal(json!(1))), None]
    );
}

#[tokio::test]
async fn test_change_listener_across_parties() {
    let net = common::setup_network(&["alice", "bob"]);
    let location = net.location().unwrap();
    let mut alice = ObjectStore::at(net.context("alice").unwrap(), location.clone());
    alice.create().await.unwrap();
    alice.invite("bob", false).await.unwrap();

    let mut bob = ObjectStore::at(net.context("bob").unwrap(), location);
    bob.join(None).await.unwrap();

    let seen: Arc<Mutex<Vec<ObjectChange>>> = Arc::default();
    let sink = seen.clone();
    let id = bob.on_change(move |change| {
        let sink = sink.clone();
        async move {
            sink.lock().push(change);
            Ok(())
        }
    });

    alice.put("news", "first").await.unwrap();
    net.eventually(common::WAIT, || async { Ok(seen.lock().len() == 1) })
        .await
        .unwrap();
    assert_eq!(seen.lock()[0].key, "news");

    assert!(bob.remove_listener(id));
    assert!(!bob.remove_listener(id));
}

#[tokio::test]
async fn test_failing_listener_does_not_block_others() {
    let net = common::setup_network(&["alice"]);
    let mut store = ObjectStore::at(net.context("alice").unwrap(), net.location().unwrap());
    store.create().await.unwrap();

    store.on_change(|_| async { Err(anyhow::anyhow!("listener failed")) });
    store.on_change(|change| async move {
        if change.key == "one" {
            panic!("listener panicked");
        }
        Ok(())
    });

    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = seen.clone();
    store.on_change(move |change| {
        let sink = sink.clone();
        async move {
            sink.lock().push(change.key);
            Ok(())
        }
    });

    store.put("one", &1).await.unwrap();
    store.put("two", &2).await.unwrap();
    net.eventually(common::WAIT, || async { Ok(seen.lock().len() == 2) })
        .await
        .unwrap();
    assert_eq!(*seen.lock(), vec!["one".to_string(), "two".to_string()]);
}
