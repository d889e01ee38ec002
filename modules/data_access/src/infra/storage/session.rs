//! In-process session store
//!
//! Keeps serialized identities and password tokens with an expiry, the way
//! an external key-value store would.

use super::mapper::{decode_identity, encode_identity};
use crate::contract::UserData;
use crate::domain::repository::SessionStore;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

const PASSWORD_TOKEN_KEY: &str = "PASSWORD_TOKEN:";

struct Entry {
    payload: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > now => return Some(entry.payload.clone()),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    fn write(&self, key: String, payload: String, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            Entry {
                payload,
                expires_at: now + ttl,
            },
        );
    }

    /// Removes the key and returns its payload if it was still live
    fn take(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .write()
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.payload)
    }

    /// Number of stored keys, expired ones included until the next write
    #[cfg(test)]
    fn stored(&self) -> usize {
        self.entries.read().len()
    }

    /// Number of live (unexpired) keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<UserData>> {
        self.read(key).map(|raw| decode_identity(&raw)).transpose()
    }

    async fn put(&self, key: &str, identity: &UserData, ttl: Duration) -> Result<()> {
        self.write(key.to_string(), encode_identity(identity)?, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn put_password_token(&self, token: &str, user_id: i64, ttl: Duration) -> Result<()> {
        self.write(
            format!("{}{}", PASSWORD_TOKEN_KEY, token),
            user_id.to_string(),
            ttl,
        );
        Ok(())
    }

    async fn take_password_token(&self, token: &str) -> Result<Option<i64>> {
        let key = format!("{}{}", PASSWORD_TOKEN_KEY, token);
        match self.take(&key) {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Permissions;

    fn identity() -> UserData {
        UserData {
            id: 3,
            token: "abc".to_string(),
            org_id: 1,
            permissions: Permissions::default(),
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemorySessionStore::new();
        store
            .put("USER_UUID_KEY:abc", &identity(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("USER_UUID_KEY:abc").await.unwrap(), Some(identity()));

        store.delete(&["USER_UUID_KEY:abc".to_string()]).await.unwrap();
        assert!(store.get("USER_UUID_KEY:abc").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemorySessionStore::new();
        store
            .put("k", &identity(), Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_password_token_is_single_use() {
        let store = InMemorySessionStore::new();
        store
            .put_password_token("tok", 9, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.take_password_token("tok").await.unwrap(), Some(9));
        assert_eq!(store.take_password_token("tok").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_token_use_succeeds_once() {
        let store = std::sync::Arc::new(InMemorySessionStore::new());
        store
            .put_password_token("tok", 9, Duration::from_secs(60))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take_password_token("tok").await.unwrap() })
            })
            .collect();
        let mut hits = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                hits += 1;
            }
        }
        assert_eq!(hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_refused_and_swept() {
        let store = InMemorySessionStore::new();
        store
            .put_password_token("old", 4, Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        store
            .put("fresh", &identity(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.stored(), 1);
        assert_eq!(store.take_password_token("old").await.unwrap(), None);
    }
}
