//! Key/value object storage used for frame images and detection batches.
//!
//! Keys are `/`-separated relative paths such as `images/frame_0001.jpg`.

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Stores `body` under `key`. Readers never observe a partially written object.
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;
    /// Returns every key starting with `prefix`, in ascending order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let malformed = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if malformed {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Objects stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let write_err = |source| StorageError::Write {
            key: key.to_string(),
            source,
        };

        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(StorageError::InvalidKey(key.to_string()));
        };
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;

        let partial = parent.join(format!(
            ".{}.{}-{}.partial",
            file_name.to_string_lossy(),
            std::process::id(),
            PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&partial, &body).await.map_err(write_err)?;

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(write_err(e));
        }

        tracing::trace!(key, bytes = body.len(), "object stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(source) => Err(StorageError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let read_err = |source| StorageError::Read {
            key: prefix.to_string(),
            source,
        };

        // Only walk the deepest directory the prefix pins down.
        let base = match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        };
        if !base.is_empty() {
            validate_key(base.trim_end_matches('/'))?;
        }

        let start = self.root.join(base);
        match tokio::fs::metadata(&start).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_err(e)),
        }

        let mut keys = Vec::new();
        let mut pending = vec![(start, base.to_string())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(read_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }
                let key = format!("{key_prefix}{name}");
                let file_type = entry.file_type().await.map_err(read_err)?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else if file_type.is_file() && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort_unstable();
        Ok(keys)
    }
}

/// Objects kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects.write().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("images/frame_0001.jpg").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("images/../../etc").is_err());
        assert!(validate_key("images//frame").is_err());
        assert!(validate_key("images/").is_err());
    }

    #[tokio::test]
    async fn test_local_store_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LocalObjectStore::new(dir.path());

        store
            .put("images/frame_0001.jpg", Bytes::from_static(b"jpeg"))
            .await?;
        let data = store.get("images/frame_0001.jpg").await?;

        assert_eq!(&data[..], b"jpeg");
        assert!(dir.path().join("images/frame_0001.jpg").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_store_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let err = store.get("images/frame_0404.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(key) if key == "images/frame_0404.jpg"));
    }

    #[tokio::test]
    async fn test_local_store_list_is_sorted_and_skips_partials(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = LocalObjectStore::new(dir.path());

        for key in [
            "detections/year=2025/month=09/day=17/b.json",
            "detections/year=2025/month=09/day=16/a.json",
            "images/frame_0001.jpg",
        ] {
            store.put(key, Bytes::from_static(b"{}")).await?;
        }
        std::fs::write(
            dir.path().join("detections/year=2025/month=09/day=16/.c.json.1-1.partial"),
            b"half",
        )?;

        let keys = store.list("detections/").await?;
        assert_eq!(
            keys,
            vec![
                "detections/year=2025/month=09/day=16/a.json".to_string(),
                "detections/year=2025/month=09/day=17/b.json".to_string(),
            ]
        );

        let day = store.list("detections/year=2025/month=09/day=17/").await?;
        assert_eq!(day.len(), 1);

        assert!(store.list("nothing/here/").await?.is_empty());
        assert_eq!(store.list("").await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_list_by_prefix() -> Result<(), Box<dyn std::error::Error>> {
        let store = MemoryObjectStore::new();
        store.put("images/b", Bytes::from_static(b"2")).await?;
        store.put("images/a", Bytes::from_static(b"1")).await?;
        store.put("imagesx/c", Bytes::from_static(b"3")).await?;

        assert_eq!(store.list("images/").await?, vec!["images/a", "images/b"]);
        assert_eq!(store.len(), 3);
        assert!(store.put("../escape", Bytes::new()).await.is_err());
        Ok(())
    }
}
