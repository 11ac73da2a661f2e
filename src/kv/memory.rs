//! In-process [`KvStore`] backed by `DashMap`.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{KvStore, glob_match};
use crate::Result;

/// Hash collections held in memory. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    hashes: DashMap<String, HashMap<String, String>>,
}

impl MemoryKvStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let now_empty = match self.hashes.get_mut(key) {
            Some(mut hash) => {
                hash.remove(field);
                hash.is_empty()
            }
            None => false,
        };
        // Redis drops a hash once its last field is gone
        if now_empty {
            self.hashes.remove_if(key, |_, hash| hash.is_empty());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.clone())
            .unwrap_or_default())
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut keys: Vec<String> = self
            .hashes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| glob_match(pattern, key))
            .collect();
        keys.sort();

        let start = cursor as usize;
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let page = keys.get(start..end).map(<[String]>::to_vec).unwrap_or_default();
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hset_then_hget() {
        let store = MemoryKvStore::new();
        store.hset("h", "f", "v").await.unwrap();

        assert_eq!(store.hget("h", "f").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.hget("h", "missing").await.unwrap(), None);
        assert_eq!(store.hget("missing", "f").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hdel_is_idempotent_and_drops_empty_hash() {
        let store = MemoryKvStore::new();
        store.hset("h", "f", "v").await.unwrap();

        store.hdel("h", "f").await.unwrap();
        store.hdel("h", "f").await.unwrap();
        store.hdel("never", "f").await.unwrap();

        assert!(store.hgetall("h").await.unwrap().is_empty());
        let (_, keys) = store.scan(0, "*", 10).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn scan_pages_until_cursor_zero() {
        let store = MemoryKvStore::new();
        for i in 0..3 {
            store.hset(&format!("k{i}"), "f", "v").await.unwrap();
        }

        let (next, first) = store.scan(0, "k*", 2).await.unwrap();
        assert_eq!(first, vec!["k0", "k1"]);
        assert_ne!(next, 0);

        let (next, second) = store.scan(next, "k*", 2).await.unwrap();
        assert_eq!(second, vec!["k2"]);
        assert_eq!(next, 0);
    }
}
