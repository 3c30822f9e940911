//! Long-term memory that outlives a single turn.
//!
//! A [`MemoryStore`] is a plain key-value store. When one is attached to an
//! agent, the model gets two tools to use it: `save_memory` and
//! `recall_memory`.

mod tools;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

pub use tools::{RecallMemoryTool, SaveMemoryTool};

/// A key-value store for facts the agent wants to remember.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str);

    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> Option<String>;

    /// Returns all keys in ascending order.
    async fn keys(&self) -> Vec<String>;

    /// Removes `key`, returning whether it was present.
    async fn delete(&self, key: &str) -> bool;
}

/// In-memory store. Not persistent, everything is lost when the process
/// exits.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn put(&self, key: &str, value: &str) {
        let mut inner = self.inner.write().await;
        inner.insert(key.to_owned(), value.to_owned());
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.inner.read().await.get(key).cloned()
    }

    async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> =
            self.inner.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn delete(&self, key: &str) -> bool {
        self.inner.write().await.remove(key).is_some()
    }
}
