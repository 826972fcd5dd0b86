//! The shared key-value store every pair signals through.
//!
//! There is no direct control channel between the two parties of a
//! session: all handshake state rides on a store both can reach. The
//! store is logically two keyed regions, one per role; each party only
//! ever writes its own region and only ever reads the other's.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::common::Role;

/// The error type for store operations. Store faults are transient by
/// contract: callers degrade to a cached snapshot instead of failing the
/// session.
pub type StoreError = anyhow::Error;

/// A blocking get/set key-value store shared by exactly two parties.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Reads a key. Missing keys are an error; the session layer decides
    /// how to degrade.
    async fn get(&self, key: &str) -> Result<String, StoreError>;
}

/// The store key a party of the given role writes its status record to.
pub fn half_key(role: Role) -> String {
    format!("fedlink/{}", role)
}

/// A process-local [`KvStore`], used by the in-memory connector and by
/// tests. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("no value under key `{}`", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = InMemoryStore::new();
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let store = InMemoryStore::new();
        assert!(store.get("absent").await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let store = InMemoryStore::new();
        let other = store.clone();
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), "v");
    }

    #[test]
    fn test_half_keys_are_disjoint() {
        assert_ne!(half_key(Role::Leader), half_key(Role::Follower));
    }
}
