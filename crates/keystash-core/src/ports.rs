//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the cache engine and the
//! external collaborators it drives: the object store holding archives and
//! the CI job runner that owns inputs, outputs and per-job state.

use crate::cache::{CacheObject, ObjectMetadata};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;

/// Result of a create-if-absent upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The object was written by this call.
    Stored,
    /// Another writer got there first; nothing was written.
    AlreadyExists,
}

/// Remote object store holding cache archives.
///
/// Lookup failures (`head`, `list`, `metadata`) are reported as
/// [`crate::Error::Resolution`]; transfers as [`crate::Error::Transport`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Point lookup of a single object.
    async fn head(&self, bucket: &str, name: &str) -> Result<Option<CacheObject>>;

    /// Check if an object exists.
    async fn exists(&self, bucket: &str, name: &str) -> Result<bool> {
        Ok(self.head(bucket, name).await?.is_some())
    }

    /// List all objects whose name starts with `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<CacheObject>>;

    /// Read the custom metadata of an object.
    async fn metadata(&self, bucket: &str, name: &str) -> Result<Option<ObjectMetadata>>;

    /// Download an object to a local file, replacing its contents.
    async fn download(&self, bucket: &str, name: &str, dest: &Path) -> Result<()>;

    /// Upload a local file unless an object with that name already exists.
    async fn upload(
        &self,
        bucket: &str,
        src: &Path,
        name: &str,
        metadata: &ObjectMetadata,
    ) -> Result<UploadOutcome>;
}

/// The CI job runner invoking a phase.
pub trait JobEnvironment: Send + Sync {
    /// Publish a step output.
    fn set_output(&self, name: &str, value: &str) -> Result<()>;

    /// Persist a value for a later phase of the same job.
    fn save_state(&self, name: &str, value: &str) -> Result<()>;

    /// Persist several values in one write.
    ///
    /// Environments that can do so write every entry or none of them.
    fn save_states(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (name, value) in entries {
            self.save_state(name, value)?;
        }
        Ok(())
    }

    /// Read a value persisted by an earlier phase.
    fn get_state(&self, name: &str) -> Result<Option<String>>;

    /// Forget values once the phase that needed them has read them.
    fn clear_state(&self, names: &[&str]) -> Result<()>;

    /// Open a collapsible log group.
    fn start_group(&self, title: &str);

    /// Close the current log group.
    fn end_group(&self);

    /// Mark the step as failed.
    fn set_failed(&self, message: &str);
}
