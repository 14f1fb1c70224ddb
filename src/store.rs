use std::collections::HashMap;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value persistence. Each write replaces the whole value for its key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

pub async fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.read(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    store.write(key, serde_json::to_value(value)?).await
}

/// In-process store; contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
