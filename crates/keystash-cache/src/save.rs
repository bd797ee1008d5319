//! Save phase.

use crate::archiver::Archiver;
use crate::{grouped, temp_archive};
use crate::handoff::Handoff;
use crate::paths;
use crate::types::{CacheSaveRequest, SaveOutcome, SkipReason, effective_root};
use keystash_core::{
    Error, HandoffState, JobEnvironment, MatchKind, ObjectMetadata, ObjectStore, Result,
    UploadOutcome, object_name,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Save inputs after filling gaps in the step's own inputs from the handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTarget {
    pub bucket: String,
    pub object_name: String,
    pub path: String,
    pub root: PathBuf,
}

fn prefer<'s>(input: &'s str, handoff: &'s str) -> &'s str {
    if input.trim().is_empty() { handoff } else { input }
}

impl SaveTarget {
    /// Explicit inputs win; the handoff only supplies what the step left out.
    pub fn merge(request: &CacheSaveRequest, state: &HandoffState) -> Result<Self> {
        let bucket = prefer(&request.bucket, &state.bucket).trim().to_string();
        let path = prefer(&request.path, &state.source_paths).to_string();
        let root_dir = prefer(&request.root_dir, &state.root_dir);

        let explicit = !request.key.trim().is_empty() && !request.namespace.trim().is_empty();
        let object_name = if explicit {
            object_name(request.namespace.trim(), request.key.trim())
        } else if !state.target_object_name.trim().is_empty() {
            state.target_object_name.clone()
        } else {
            return Err(Error::Configuration(
                "A cache key and repository namespace are required to save".into(),
            ));
        };

        if bucket.is_empty() {
            return Err(Error::Configuration("Input required and not supplied: bucket".into()));
        }
        if path.trim().is_empty() {
            return Err(Error::Configuration("Input required and not supplied: path".into()));
        }

        Ok(Self {
            bucket,
            object_name,
            path,
            root: effective_root(&request.workspace, root_dir),
        })
    }
}

pub struct SavePhase<'a> {
    store: &'a dyn ObjectStore,
    env: &'a dyn JobEnvironment,
    archiver: &'a Archiver,
    temp_dir: Option<PathBuf>,
}

impl<'a> SavePhase<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        env: &'a dyn JobEnvironment,
        archiver: &'a Archiver,
    ) -> Self {
        Self {
            store,
            env,
            archiver,
            temp_dir: None,
        }
    }

    /// Stage archives in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Archive the workspace paths and upload them unless the exact key is
    /// already stored.
    pub async fn run(&self, request: &CacheSaveRequest) -> Result<SaveOutcome> {
        let handoff = Handoff::new(self.env);
        let state = handoff.load()?;
        // Read once; a later job sharing this environment must not see it.
        handoff.clear()?;

        let target = SaveTarget::merge(request, &state)?;

        let exact_hit = state.cache_hit_kind == MatchKind::Exact
            && state.target_object_name == target.object_name;
        if exact_hit {
            info!("Skipping uploading cache as the cache was hit by exact match");
            return Ok(SaveOutcome::Skipped(SkipReason::ExactHit));
        }
        let span = info_span!("save", object = %target.object_name, bucket = %target.bucket);

        let result = self.save(&target).instrument(span).await;
        if let Err(e) = &result {
            error!(error = %e, "Save failed");
        }
        result
    }

    async fn save(&self, target: &SaveTarget) -> Result<SaveOutcome> {
        let start = Instant::now();

        if self.store.exists(&target.bucket, &target.object_name).await? {
            info!("Skipping uploading cache as it already exists (probably due to another job)");
            return Ok(SaveOutcome::Skipped(SkipReason::AlreadyExists));
        }

        let paths = paths::collect(&target.path, &target.root)?;
        if paths.is_empty() {
            warn!(patterns = %target.path, root = %target.root.display(), "No files matched the cache paths");
            return Ok(SaveOutcome::Skipped(SkipReason::NothingToCache));
        }
        debug!(?paths, "Paths to cache");

        // Removed on drop, on every exit path below.
        let archive = temp_archive(self.temp_dir.as_deref())
            .map_err(|e| Error::create(format!("Failed to create temporary file: {}", e)))?;

        let compression = grouped(
            self.env,
            "Creating cache archive",
            self.archiver.create(archive.path(), &paths, &target.root),
        )
        .await?;

        let size_bytes = tokio::fs::metadata(archive.path())
            .await
            .map(|m| m.len())
            .map_err(|e| Error::create(format!("Archive missing after tar: {}", e)))?;

        let metadata = ObjectMetadata::for_compression(compression);
        debug!(?metadata, "Custom metadata");

        let uploaded = grouped(self.env, "Uploading cache archive to bucket", async {
            info!(object = %target.object_name, size_bytes, "Uploading archive");
            self.store
                .upload(&target.bucket, archive.path(), &target.object_name, &metadata)
                .await
        })
        .await?;

        match uploaded {
            UploadOutcome::Stored => {
                info!(object = %target.object_name, method = %compression, "Saved cache");
                Ok(SaveOutcome::Saved {
                    object: target.object_name.clone(),
                    compression,
                    size_bytes,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
            UploadOutcome::AlreadyExists => {
                info!("Another job stored this cache key first; keeping its archive");
                Ok(SaveOutcome::Skipped(SkipReason::AlreadyExists))
            }
        }
    }
}
