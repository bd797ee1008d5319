//! Restore and save phases of the Keystash build cache.

pub mod archiver;
pub mod compression;
pub mod env;
pub mod handoff;
pub mod keys;
pub mod paths;
pub mod resolver;
pub mod restore;
pub mod save;
pub mod store;
pub mod types;

pub use archiver::Archiver;
pub use compression::{Negotiator, Platform, ProbeResult, Prober, ZstdProbe, ZstdProber, choose_method};
pub use env::{GithubActions, LocalEnvironment, MemoryEnvironment};
pub use handoff::Handoff;
pub use keys::{matches_prefix, namespace_from_repository, parse_restore_keys};
pub use resolver::Resolver;
pub use restore::{OUTPUT_CACHE_HIT, OUTPUT_CACHE_HIT_KIND, RestorePhase};
pub use save::{SavePhase, SaveTarget};
pub use store::{FilesystemStore, MemoryStore, S3Settings, S3Store, StoreCalls};
pub use types::{
    CacheRestoreRequest, CacheSaveRequest, Resolution, RestoreOutcome, SaveOutcome, SkipReason,
};

use keystash_core::JobEnvironment;
use std::future::Future;
use std::path::Path;
use tempfile::NamedTempFile;

/// Run `fut` inside a collapsible log group.
pub(crate) async fn grouped<F, T>(env: &dyn JobEnvironment, title: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    env.start_group(title);
    let output = fut.await;
    env.end_group();
    output
}

/// Fresh archive path, deleted when the handle drops.
pub(crate) fn temp_archive(dir: Option<&Path>) -> std::io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("keystash-").suffix(".tar");
    match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
}
