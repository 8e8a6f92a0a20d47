//! Integration tests for file and graph backed vaults

mod common;

use std::sync::Arc;

use ::common::crypto::KeyPairSet;
use ::common::graph::{GraphStore, Location, MemoryGraph};
use ::common::identity::Identity;
use ::common::vault::{FileVaultStore, GraphVaultStore, Vault, VaultError, VaultStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_file_vault_round_trip() {
    common::init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("keys").join("vault.json");

    let mut vault = Vault::new(FileVaultStore::new(&path));
    vault.unlock("correct horse").await.unwrap();
    let pair = vault.create_pair("device").unwrap();
    vault.put("api", &serde_json::json!({ "token": "t0ken" })).unwrap();
    vault.seal().await.unwrap();

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(!on_disk.contains("t0ken"));
    let parsed: serde_json::Value = serde_json::from_str(&on_disk).unwrap();
    assert!(parsed["salt"].is_string());
    assert!(parsed["content"].as_str().unwrap().starts_with("SEA{"));

    let mut reopened = Vault::new(FileVaultStore::new(&path));
    assert!(matches!(
        reopened.unlock("wrong horse").await,
        Err(VaultError::WrongPassphrase)
    ));
    reopened.unlock("correct horse").await.unwrap();
    let restored: KeyPairSet = reopened.get_pair("device").unwrap().unwrap();
    let identity = Identity::from_keys(restored).unwrap();
    assert!(identity.is(&pair.public_keys().unwrap()));
}

#[tokio::test]
async fn test_missing_file_starts_empty() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileVaultStore::new(temp_dir.path().join("absent.json"));
    assert!(store.read().await.unwrap().is_none());

    let mut vault = Vault::new(store);
    vault.unlock("anything").await.unwrap();
    assert!(vault.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_graph_vault() {
    let graph = MemoryGraph::new();
    let location = Location::random().unwrap();
    let store = GraphVaultStore::new(Arc::new(graph.clone()), location.clone());

    let mut vault = Vault::new(store.clone());
    vault.unlock("pass").await.unwrap();
    vault.create_secret("session").unwrap();
    vault.save().await.unwrap();
    assert!(vault.is_unlocked());

    let stored = graph.get(&location).await.unwrap().unwrap();
    assert!(stored.contains("\"salt\""));

    let mut other = Vault::new(store);
    other.unlock("pass").await.unwrap();
    assert!(other.has("session").unwrap());
}
