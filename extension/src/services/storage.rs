// Extension local storage
//
// The host's key-value store is the only shared mutable state between
// contexts. Every mutation goes through `update`, which is the store's
// own atomic read-modify-write; callers never write back a cached copy.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value has unexpected shape: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("update produced no result")]
    Aborted,
}

/// Read-modify-write step applied under the store's guard
pub type UpdateFn<'a> = Box<dyn FnOnce(Option<Value>) -> Result<Value, StoreError> + Send + 'a>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Atomically replace the value at `key` with `apply(current)`
    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StoreError>;
}

/// Typed read; a missing key yields `T::default()`
pub async fn load<T>(store: &dyn KeyValueStore, key: &str) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match store.get(key).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(T::default()),
    }
}

/// Typed atomic read-modify-write returning whatever `f` computed
pub async fn modify<T, R, F>(store: &dyn KeyValueStore, key: &str, f: F) -> Result<R, StoreError>
where
    T: Serialize + DeserializeOwned + Default,
    R: Send,
    F: FnOnce(&mut T) -> R + Send,
{
    let mut output = None;
    let slot = &mut output;

    store
        .update(
            key,
            Box::new(move |current| {
                let mut value: T = match current {
                    Some(v) => serde_json::from_value(v)?,
                    None => T::default(),
                };
                *slot = Some(f(&mut value));
                Ok(serde_json::to_value(&value)?)
            }),
        )
        .await?;

    output.ok_or(StoreError::Aborted)
}

/// Volatile store, used in tests and for session-scoped state
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.items.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StoreError> {
        let mut items = self.items.lock().await;
        let next = apply(items.get(key).cloned())?;
        items.insert(key.to_string(), next);
        Ok(())
    }
}

/// JSON document on disk, rewritten via temp file + rename
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, items: &HashMap<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(items)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Remove every key
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        tracing::info!("Clearing storage at {}", self.path.display());
        self.write_all(&HashMap::new()).await
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.guard.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        let mut items = self.read_all().await?;
        items.insert(key.to_string(), value);
        self.write_all(&items).await
    }

    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        let mut items = self.read_all().await?;
        let next = apply(items.remove(key))?;
        items.insert(key.to_string(), next);
        self.write_all(&items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("extension-store-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_load_missing_key_is_default() {
        let store = MemoryStore::new();
        let items: Vec<String> = load(&store, "nothing").await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_modify_returns_computed_value() {
        let store = MemoryStore::new();
        let len = modify(&store, "list", |items: &mut Vec<u32>| {
            items.push(7);
            items.len()
        })
        .await
        .unwrap();

        assert_eq!(len, 1);
        assert_eq!(store.get("list").await.unwrap(), Some(json!([7])));
    }

    #[tokio::test]
    async fn test_concurrent_modifies_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    modify(store.as_ref(), "list", move |items: &mut Vec<u32>| items.push(i))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let items: Vec<u32> = load(store.as_ref(), "list").await.unwrap();
        assert_eq!(items.len(), 32);
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let path = temp_path();

        let store = FileStore::new(&path);
        store.set("currentWindowId", json!(12)).await.unwrap();
        modify(&store, "queue", |q: &mut Vec<String>| q.push("a".into()))
            .await
            .unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("currentWindowId").await.unwrap(), Some(json!(12)));
        assert_eq!(reopened.get("queue").await.unwrap(), Some(json!(["a"])));

        reopened.clear().await.unwrap();
        assert_eq!(reopened.get("queue").await.unwrap(), None);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_malformed_value_is_serialization_error() {
        let store = MemoryStore::new();
        store.set("list", json!("not a list")).await.unwrap();

        let err = load::<Vec<u32>>(&store, "list").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
