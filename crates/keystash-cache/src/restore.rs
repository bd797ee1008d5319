//! Restore phase.

use crate::archiver::Archiver;
use crate::{grouped, temp_archive};
use crate::handoff::Handoff;
use crate::resolver::Resolver;
use crate::types::{CacheRestoreRequest, RestoreOutcome};
use keystash_core::{
    CompressionMethod, Error, HandoffState, JobEnvironment, MatchKind, ObjectMetadata, ObjectStore,
    Result, object_name,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

pub const OUTPUT_CACHE_HIT: &str = "cache-hit";
pub const OUTPUT_CACHE_HIT_KIND: &str = "cache-hit-kind";

pub struct RestorePhase<'a> {
    store: &'a dyn ObjectStore,
    env: &'a dyn JobEnvironment,
    archiver: &'a Archiver,
    temp_dir: Option<PathBuf>,
}

fn recorded_method(metadata: Option<ObjectMetadata>) -> Result<CompressionMethod> {
    metadata
        .ok_or_else(|| Error::Metadata("object disappeared before its metadata was read".into()))?
        .compression_method()
}

impl<'a> RestorePhase<'a> {
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

    /// Download archives into `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Restore the best matching archive into the workspace.
    ///
    /// The handoff state is written exactly once whatever happens; a failed
    /// restore records a miss so the save phase can still run.
    pub async fn run(&self, request: &CacheRestoreRequest) -> Result<RestoreOutcome> {
        let span = info_span!("restore", key = %request.key, bucket = %request.bucket);
        let start = Instant::now();
        let exact_name = object_name(&request.namespace, &request.key);

        let result = self.restore(request).instrument(span).await;
        if let Err(e) = &result {
            error!(error = %e, "Restore failed; recording a cache miss");
        }

        let kind = result.as_ref().map(|o| o.kind).unwrap_or(MatchKind::None);
        let saved = Handoff::new(self.env).save(&HandoffState {
            cache_hit_kind: kind,
            target_object_name: exact_name,
            bucket: request.bucket.clone(),
            source_paths: request.path.clone(),
            root_dir: request.root_dir.clone(),
        });

        let mut outcome = result?;
        saved?;

        self.env
            .set_output(OUTPUT_CACHE_HIT, if outcome.kind.is_hit() { "true" } else { "false" })?;
        self.env.set_output(OUTPUT_CACHE_HIT_KIND, outcome.kind.as_str())?;

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        Ok(outcome)
    }

    async fn restore(&self, request: &CacheRestoreRequest) -> Result<RestoreOutcome> {
        let miss = RestoreOutcome {
            kind: MatchKind::None,
            restored_object: None,
            compression: None,
            duration_ms: 0,
        };

        let resolver = Resolver::new(self.store, &request.bucket, &request.namespace);
        let resolution = grouped(
            self.env,
            "Searching the best cache archive available",
            resolver.resolve(&request.key, &request.restore_keys),
        )
        .await?;

        let Some(object) = resolution.object else {
            info!("No cache candidate found");
            return Ok(miss);
        };

        let metadata = self.store.metadata(&request.bucket, &object.name).await?;
        let method = match recorded_method(metadata) {
            Ok(method) => method,
            Err(e) if e.is_soft_miss() => {
                warn!(object = %object.name, error = %e, "Ignoring cache candidate");
                return Ok(miss);
            }
            Err(e) => return Err(e),
        };
        info!(object = %object.name, method = %method, "Detected compression method from object metadata");

        // Removed on drop, on every exit path below.
        let archive = temp_archive(self.temp_dir.as_deref())
            .map_err(|e| Error::download(format!("Failed to create temporary file: {}", e)))?;

        grouped(
            self.env,
            "Downloading cache archive from bucket",
            self.store.download(&request.bucket, &object.name, archive.path()),
        )
        .await?;

        let root = request.effective_root();
        grouped(
            self.env,
            "Extracting cache archive",
            self.archiver.extract(archive.path(), method, &root),
        )
        .await?;

        info!(kind = %resolution.kind, object = %object.name, "Restored cache");
        Ok(RestoreOutcome {
            kind: resolution.kind,
            restored_object: Some(object.name),
            compression: Some(method),
            duration_ms: 0,
        })
    }
}
