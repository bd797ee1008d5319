//! In-memory object store for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystash_core::{CacheObject, Error, ObjectMetadata, ObjectStore, Result, UploadOutcome};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub head: usize,
    pub list: usize,
    pub metadata: usize,
    pub download: usize,
    pub upload: usize,
}

#[derive(Debug, Clone)]
struct StoredObject {
    object: CacheObject,
    metadata: ObjectMetadata,
    data: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    calls: Mutex<StoreCalls>,
    fail_lookups: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub fn insert(
        &self,
        bucket: &str,
        name: &str,
        last_updated: DateTime<Utc>,
        data: Vec<u8>,
        metadata: ObjectMetadata,
    ) {
        let object = CacheObject {
            name: name.to_string(),
            last_updated,
            size_bytes: data.len() as u64,
        };
        lock(&self.objects).insert(
            (bucket.to_string(), name.to_string()),
            StoredObject {
                object,
                metadata,
                data,
            },
        );
    }

    /// Contents of a stored object.
    pub fn data(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        lock(&self.objects)
            .get(&(bucket.to_string(), name.to_string()))
            .map(|stored| stored.data.clone())
    }

    pub fn calls(&self) -> StoreCalls {
        *lock(&self.calls)
    }

    /// Make `head`, `list` and `metadata` fail, as an unreachable store would.
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    fn check_lookup(&self) -> Result<()> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Error::Resolution("store unavailable".into()));
        }
        Ok(())
    }

    fn get(&self, bucket: &str, name: &str) -> Option<StoredObject> {
        lock(&self.objects)
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, bucket: &str, name: &str) -> Result<Option<CacheObject>> {
        lock(&self.calls).head += 1;
        self.check_lookup()?;
        Ok(self.get(bucket, name).map(|stored| stored.object))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<CacheObject>> {
        lock(&self.calls).list += 1;
        self.check_lookup()?;
        Ok(lock(&self.objects)
            .iter()
            .filter(|((b, name), _)| b == bucket && name.starts_with(prefix))
            .map(|(_, stored)| stored.object.clone())
            .collect())
    }

    async fn metadata(&self, bucket: &str, name: &str) -> Result<Option<ObjectMetadata>> {
        lock(&self.calls).metadata += 1;
        self.check_lookup()?;
        Ok(self.get(bucket, name).map(|stored| stored.metadata))
    }

    async fn download(&self, bucket: &str, name: &str, dest: &Path) -> Result<()> {
        lock(&self.calls).download += 1;
        let stored = self
            .get(bucket, name)
            .ok_or_else(|| Error::download(format!("{}/{} not found", bucket, name)))?;
        tokio::fs::write(dest, &stored.data)
            .await
            .map_err(|e| Error::download(format!("Failed to write {}: {}", dest.display(), e)))
    }

    async fn upload(
        &self,
        bucket: &str,
        src: &Path,
        name: &str,
        metadata: &ObjectMetadata,
    ) -> Result<UploadOutcome> {
        lock(&self.calls).upload += 1;
        let data = tokio::fs::read(src)
            .await
            .map_err(|e| Error::upload(format!("Failed to read {}: {}", src.display(), e)))?;

        let mut objects = lock(&self.objects);
        let key = (bucket.to_string(), name.to_string());
        if objects.contains_key(&key) {
            return Ok(UploadOutcome::AlreadyExists);
        }
        let object = CacheObject {
            name: name.to_string(),
            last_updated: Utc::now(),
            size_bytes: data.len() as u64,
        };
        objects.insert(
            key,
            StoredObject {
                object,
                metadata: metadata.clone(),
                data,
            },
        );
        Ok(UploadOutcome::Stored)
    }
}
