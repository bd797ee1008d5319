//! Filesystem-backed object store for local runs.
//!
//! Layout: `<root>/<bucket>/<object name>`, with custom metadata in a
//! `<object name>.meta.json` sidecar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keystash_core::{CacheObject, Error, ObjectMetadata, ObjectStore, Result, UploadOutcome};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const METADATA_SUFFIX: &str = ".meta.json";

pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root_dir.join(bucket)
    }

    fn object_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.bucket_dir(bucket).join(name)
    }

    fn metadata_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.bucket_dir(bucket)
            .join(format!("{}{}", name, METADATA_SUFFIX))
    }
}

fn to_cache_object(name: String, metadata: &std::fs::Metadata) -> CacheObject {
    let last_updated = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();
    CacheObject {
        name,
        last_updated,
        size_bytes: metadata.len(),
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn head(&self, bucket: &str, name: &str) -> Result<Option<CacheObject>> {
        let path = self.object_path(bucket, name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {
                Ok(Some(to_cache_object(name.to_string(), &metadata)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Resolution(format!(
                "Failed to stat {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<CacheObject>> {
        let bucket_dir = self.bucket_dir(bucket);
        // Only the directory part of the prefix needs walking.
        let search_dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => bucket_dir.join(dir),
            None => bucket_dir.clone(),
        };
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !search_dir.is_dir() {
                return Ok(vec![]);
            }

            let mut entries = vec![];
            for entry in WalkDir::new(&search_dir) {
                let entry = entry
                    .map_err(|e| Error::Resolution(format!("Failed to read cache dir: {}", e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&bucket_dir) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !name.starts_with(&prefix) || name.ends_with(METADATA_SUFFIX) {
                    continue;
                }
                let metadata = entry
                    .metadata()
                    .map_err(|e| Error::Resolution(format!("Failed to read metadata: {}", e)))?;
                entries.push(to_cache_object(name, &metadata));
            }
            Ok(entries)
        })
        .await
        .map_err(|e| Error::Internal(format!("Listing task failed: {}", e)))?
    }

    async fn metadata(&self, bucket: &str, name: &str) -> Result<Option<ObjectMetadata>> {
        if self.head(bucket, name).await?.is_none() {
            return Ok(None);
        }

        let path = self.metadata_path(bucket, name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<ObjectMetadata>(&bytes) {
                Ok(metadata) => Ok(Some(metadata)),
                Err(e) => {
                    // Corrupt sidecar reads as "no metadata"; the caller decides.
                    debug!(path = %path.display(), error = %e, "Unreadable metadata sidecar");
                    Ok(Some(ObjectMetadata::new()))
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(ObjectMetadata::new())),
            Err(e) => Err(Error::Resolution(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn download(&self, bucket: &str, name: &str, dest: &Path) -> Result<()> {
        let path = self.object_path(bucket, name);
        tokio::fs::copy(&path, dest).await.map_err(|e| {
            Error::download(format!(
                "Failed to copy {} to {}: {}",
                path.display(),
                dest.display(),
                e
            ))
        })?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        src: &Path,
        name: &str,
        metadata: &ObjectMetadata,
    ) -> Result<UploadOutcome> {
        let object_path = self.object_path(bucket, name);
        let parent = object_path
            .parent()
            .ok_or_else(|| Error::upload(format!("Invalid object name: {}", name)))?
            .to_path_buf();

        tokio::fs::create_dir_all(&parent).await.map_err(|e| {
            Error::upload(format!("Failed to create cache dir: {}", e))
        })?;

        let staged = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| Error::upload(format!("Failed to stage upload: {}", e)))?;
        tokio::fs::copy(src, staged.path()).await.map_err(|e| {
            Error::upload(format!("Failed to copy {}: {}", src.display(), e))
        })?;

        // No-clobber rename gives create-if-absent; the object must win
        // before its sidecar is written.
        match staged.persist_noclobber(&object_path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                return Ok(UploadOutcome::AlreadyExists);
            }
            Err(e) => {
                return Err(Error::upload(format!(
                    "Failed to store {}: {}",
                    object_path.display(),
                    e.error
                )));
            }
        }

        let sidecar = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(self.metadata_path(bucket, name), sidecar)
            .await
            .map_err(|e| Error::upload(format!("Failed to write metadata: {}", e)))?;

        Ok(UploadOutcome::Stored)
    }
}

impl Default for FilesystemStore {
    fn default() -> Self {
        Self::new(PathBuf::from("/var/keystash/cache"))
    }
}
