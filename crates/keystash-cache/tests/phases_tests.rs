//! Restore and save phases driven end to end against in-process stores.
//!
//! Archive round trips shell out to the host `tar` and `gzip`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use keystash_cache::{
    Archiver, CacheRestoreRequest, CacheSaveRequest, FilesystemStore, Handoff, LocalEnvironment,
    MemoryEnvironment, MemoryStore, Negotiator, OUTPUT_CACHE_HIT, OUTPUT_CACHE_HIT_KIND, Platform,
    ProbeResult, Prober, RestorePhase, SaveOutcome, SavePhase, SkipReason, StoreCalls, ZstdProbe,
    ZstdProber,
};
use keystash_core::{
    ArchiveStage, CompressionMethod, Error, HandoffState, JobEnvironment, MatchKind,
    ObjectMetadata, ObjectStore,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

const BUCKET: &str = "ci-cache";
const NAMESPACE: &str = "acme/widgets";

/// Host without zstd, so every archive is gzip.
struct GzipOnly;

#[async_trait]
impl Prober for GzipOnly {
    async fn probe(&self) -> ProbeResult {
        ProbeResult {
            platform: Platform::Unix,
            zstd: ZstdProbe::Missing,
        }
    }

    async fn probe_zstd(&self) -> ZstdProbe {
        ZstdProbe::Missing
    }
}

fn archiver() -> Archiver {
    Archiver::new(Negotiator::new(Arc::new(GzipOnly)))
}

fn restore_request(workspace: &Path, key: &str, restore_keys: &[&str]) -> CacheRestoreRequest {
    CacheRestoreRequest {
        bucket: BUCKET.into(),
        namespace: NAMESPACE.into(),
        key: key.into(),
        restore_keys: restore_keys.iter().map(|k| k.to_string()).collect(),
        path: "target".into(),
        root_dir: String::new(),
        workspace: workspace.to_path_buf(),
    }
}

fn save_request(workspace: &Path, key: &str) -> CacheSaveRequest {
    CacheSaveRequest {
        bucket: BUCKET.into(),
        namespace: NAMESPACE.into(),
        key: key.into(),
        path: "target".into(),
        root_dir: String::new(),
        workspace: workspace.to_path_buf(),
    }
}

fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn test_save_then_restore_round_trip() {
    let store = MemoryStore::new();
    let archiver = archiver();

    // Job 1: miss, build, save.
    let job1 = tempfile::tempdir().unwrap();
    let env1 = MemoryEnvironment::new();
    let outcome = RestorePhase::new(&store, &env1, &archiver)
        .run(&restore_request(job1.path(), "build-1", &["build-"]))
        .await
        .unwrap();
    assert_eq!(outcome.kind, MatchKind::None);
    assert_eq!(env1.output(OUTPUT_CACHE_HIT).as_deref(), Some("false"));

    write_file(job1.path(), "target/debug/app", "binary");
    write_file(job1.path(), "target/debug/deps/libfoo.rlib", "rlib");

    let saved = SavePhase::new(&store, &env1, &archiver)
        .run(&save_request(job1.path(), "build-1"))
        .await
        .unwrap();
    let (object, compression) = match saved {
        SaveOutcome::Saved {
            object, compression, ..
        } => (object, compression),
        other => panic!("expected an upload, got {:?}", other),
    };
    assert_eq!(object, "acme/widgets/build-1.tar");
    assert_eq!(compression, CompressionMethod::Gzip);

    let metadata = store.metadata(BUCKET, &object).await.unwrap().unwrap();
    assert_eq!(metadata.compression_method().unwrap(), CompressionMethod::Gzip);

    // Job 2: different key, restored through the prefix.
    let job2 = tempfile::tempdir().unwrap();
    let env2 = MemoryEnvironment::new();
    let outcome = RestorePhase::new(&store, &env2, &archiver)
        .run(&restore_request(job2.path(), "build-2", &["build-"]))
        .await
        .unwrap();

    assert_eq!(outcome.kind, MatchKind::Partial);
    assert_eq!(outcome.restored_object.as_deref(), Some("acme/widgets/build-1.tar"));
    assert_eq!(outcome.compression, Some(CompressionMethod::Gzip));
    assert_eq!(env2.output(OUTPUT_CACHE_HIT).as_deref(), Some("true"));
    assert_eq!(env2.output(OUTPUT_CACHE_HIT_KIND).as_deref(), Some("partial"));
    assert_eq!(
        std::fs::read_to_string(job2.path().join("target/debug/app")).unwrap(),
        "binary"
    );
    assert_eq!(
        std::fs::read_to_string(job2.path().join("target/debug/deps/libfoo.rlib")).unwrap(),
        "rlib"
    );
}

#[tokio::test]
async fn test_exact_hit_save_touches_nothing() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    Handoff::new(&env)
        .save(&HandoffState {
            cache_hit_kind: MatchKind::Exact,
            target_object_name: "acme/widgets/k1.tar".into(),
            bucket: BUCKET.into(),
            source_paths: "target".into(),
            root_dir: String::new(),
        })
        .unwrap();
    write_file(workspace.path(), "target/out", "data");

    let outcome = SavePhase::new(&store, &env, &archiver)
        .run(&save_request(workspace.path(), "k1"))
        .await
        .unwrap();

    assert_eq!(outcome, SaveOutcome::Skipped(SkipReason::ExactHit));
    assert_eq!(store.calls(), StoreCalls::default());
}

#[tokio::test]
async fn test_exact_restore_then_save_is_noop() {
    let store = MemoryStore::new();
    let archiver = archiver();

    let seed = tempfile::tempdir().unwrap();
    write_file(seed.path(), "target/out", "cached");
    let seeded = SavePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&save_request(seed.path(), "k1"))
        .await
        .unwrap();
    assert!(matches!(seeded, SaveOutcome::Saved { .. }));

    let job = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();
    let restored = RestorePhase::new(&store, &env, &archiver)
        .run(&restore_request(job.path(), "k1", &[]))
        .await
        .unwrap();
    assert_eq!(restored.kind, MatchKind::Exact);
    assert_eq!(env.output(OUTPUT_CACHE_HIT_KIND).as_deref(), Some("exact"));

    let uploads_before = store.calls().upload;
    let outcome = SavePhase::new(&store, &env, &archiver)
        .run(&save_request(job.path(), "k1"))
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Skipped(SkipReason::ExactHit));
    assert_eq!(store.calls().upload, uploads_before);
}

#[tokio::test]
async fn test_concurrent_winner_prevents_upload() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    // Restore saw a miss, then another job stored the key.
    Handoff::new(&env)
        .save(&HandoffState {
            cache_hit_kind: MatchKind::None,
            target_object_name: "acme/widgets/build-7.tar".into(),
            bucket: BUCKET.into(),
            source_paths: "target".into(),
            root_dir: String::new(),
        })
        .unwrap();
    store.insert(
        BUCKET,
        "acme/widgets/build-7.tar",
        Utc::now(),
        b"winner".to_vec(),
        ObjectMetadata::for_compression(CompressionMethod::Gzip),
    );
    write_file(workspace.path(), "target/out", "loser");

    let outcome = SavePhase::new(&store, &env, &archiver)
        .run(&save_request(workspace.path(), "build-7"))
        .await
        .unwrap();

    assert_eq!(outcome, SaveOutcome::Skipped(SkipReason::AlreadyExists));
    assert_eq!(store.calls().upload, 0);
    assert_eq!(
        store.data(BUCKET, "acme/widgets/build-7.tar").unwrap(),
        b"winner".to_vec()
    );
}

#[tokio::test]
async fn test_nothing_to_cache_skips_upload() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    let outcome = SavePhase::new(&store, &env, &archiver)
        .run(&save_request(workspace.path(), "build-1"))
        .await
        .unwrap();

    assert_eq!(outcome, SaveOutcome::Skipped(SkipReason::NothingToCache));
    assert_eq!(store.calls().upload, 0);
}

#[tokio::test]
async fn test_unknown_compression_metadata_is_a_miss() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    let mut metadata = ObjectMetadata::new();
    metadata.insert("Cache-Action-Compression-Method", "brotli");
    store.insert(
        BUCKET,
        "acme/widgets/build-1.tar",
        Utc::now(),
        b"not an archive".to_vec(),
        metadata,
    );

    let outcome = RestorePhase::new(&store, &env, &archiver)
        .run(&restore_request(workspace.path(), "build-1", &[]))
        .await
        .unwrap();

    assert_eq!(outcome.kind, MatchKind::None);
    assert_eq!(store.calls().download, 0);
    assert_eq!(env.output(OUTPUT_CACHE_HIT).as_deref(), Some("false"));
    assert_eq!(Handoff::new(&env).load().unwrap().cache_hit_kind, MatchKind::None);
}

#[tokio::test]
async fn test_missing_compression_metadata_is_a_miss() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    store.insert(
        BUCKET,
        "acme/widgets/build-1.tar",
        Utc::now(),
        b"not an archive".to_vec(),
        ObjectMetadata::new(),
    );

    let outcome = RestorePhase::new(&store, &env, &archiver)
        .run(&restore_request(workspace.path(), "build-1", &[]))
        .await
        .unwrap();

    assert_eq!(outcome.kind, MatchKind::None);
    assert_eq!(store.calls().download, 0);
}

#[tokio::test]
async fn test_failed_restore_still_records_handoff() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    // Declared gzip but the bytes are garbage, so tar fails.
    store.insert(
        BUCKET,
        "acme/widgets/build-1.tar",
        Utc::now(),
        b"garbage".to_vec(),
        ObjectMetadata::for_compression(CompressionMethod::Gzip),
    );

    let result = RestorePhase::new(&store, &env, &archiver)
        .run(&restore_request(workspace.path(), "build-1", &[]))
        .await;
    assert!(result.is_err());

    let state = Handoff::new(&env).load().unwrap();
    assert_eq!(
        state,
        HandoffState {
            cache_hit_kind: MatchKind::None,
            target_object_name: "acme/widgets/build-1.tar".into(),
            bucket: BUCKET.into(),
            source_paths: "target".into(),
            root_dir: String::new(),
        }
    );
}

#[tokio::test]
async fn test_unreachable_store_fails_restore_with_miss_handoff() {
    let store = MemoryStore::new();
    store.fail_lookups(true);
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    let result = RestorePhase::new(&store, &env, &archiver)
        .run(&restore_request(workspace.path(), "build-1", &["build-"]))
        .await;

    assert!(result.is_err());
    assert_eq!(env.get_state("cache-hit-kind").unwrap().as_deref(), Some("none"));
    assert_eq!(store.calls().download, 0);
}

#[tokio::test]
async fn test_partial_restore_prefers_most_recent() {
    let store = MemoryStore::new();
    let archiver = archiver();

    let older = tempfile::tempdir().unwrap();
    write_file(older.path(), "target/version", "old");
    let newer = tempfile::tempdir().unwrap();
    write_file(newer.path(), "target/version", "new");

    SavePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&save_request(older.path(), "build-40"))
        .await
        .unwrap();
    SavePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&save_request(newer.path(), "build-41"))
        .await
        .unwrap();

    // Re-seed build-40 with a timestamp far in the past.
    let archive = store.data(BUCKET, "acme/widgets/build-40.tar").unwrap();
    let fresh = MemoryStore::new();
    fresh.insert(
        BUCKET,
        "acme/widgets/build-40.tar",
        Utc::now() - Duration::hours(2),
        archive,
        ObjectMetadata::for_compression(CompressionMethod::Gzip),
    );
    fresh.insert(
        BUCKET,
        "acme/widgets/build-41.tar",
        Utc::now() - Duration::hours(1),
        store.data(BUCKET, "acme/widgets/build-41.tar").unwrap(),
        ObjectMetadata::for_compression(CompressionMethod::Gzip),
    );

    let job = tempfile::tempdir().unwrap();
    let outcome = RestorePhase::new(&fresh, &MemoryEnvironment::new(), &archiver)
        .run(&restore_request(job.path(), "build-42", &["build-"]))
        .await
        .unwrap();

    assert_eq!(outcome.restored_object.as_deref(), Some("acme/widgets/build-41.tar"));
    assert_eq!(
        std::fs::read_to_string(job.path().join("target/version")).unwrap(),
        "new"
    );
}

#[tokio::test]
async fn test_root_dir_round_trip_through_filesystem_store() {
    let store_root = tempfile::tempdir().unwrap();
    let store = FilesystemStore::new(store_root.path());
    let archiver = archiver();

    let job1 = tempfile::tempdir().unwrap();
    write_file(job1.path(), "web/node_modules/left-pad/index.js", "pad");
    let mut request = save_request(job1.path(), "deps-1");
    request.path = "node_modules".into();
    request.root_dir = "web".into();

    let saved = SavePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&request)
        .await
        .unwrap();
    assert!(matches!(saved, SaveOutcome::Saved { .. }));

    // A second save of the same key keeps the first archive.
    let again = SavePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&request)
        .await
        .unwrap();
    assert_eq!(again, SaveOutcome::Skipped(SkipReason::AlreadyExists));

    let job2 = tempfile::tempdir().unwrap();
    let mut restore = restore_request(job2.path(), "deps-1", &[]);
    restore.path = "node_modules".into();
    restore.root_dir = "web".into();
    let outcome = RestorePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&restore)
        .await
        .unwrap();

    assert_eq!(outcome.kind, MatchKind::Exact);
    assert_eq!(
        std::fs::read_to_string(job2.path().join("web/node_modules/left-pad/index.js")).unwrap(),
        "pad"
    );
}

#[tokio::test]
async fn test_phases_open_log_groups() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    write_file(workspace.path(), "target/out", "data");
    let env = MemoryEnvironment::new();

    RestorePhase::new(&store, &env, &archiver)
        .run(&restore_request(workspace.path(), "g-1", &[]))
        .await
        .unwrap();
    SavePhase::new(&store, &env, &archiver)
        .run(&save_request(workspace.path(), "g-1"))
        .await
        .unwrap();

    assert_eq!(
        env.groups(),
        vec![
            "Searching the best cache archive available".to_string(),
            "Creating cache archive".to_string(),
            "Uploading cache archive to bucket".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_jobs_sharing_state_file_keep_their_own_keys() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let state_dir = tempfile::tempdir().unwrap();
    let state_file = state_dir.path().join("state.json");
    let job_x = LocalEnvironment::new(&state_file);
    let job_y = LocalEnvironment::new(&state_file);

    let workspace_x = tempfile::tempdir().unwrap();
    let workspace_y = tempfile::tempdir().unwrap();
    RestorePhase::new(&store, &job_x, &archiver)
        .run(&restore_request(workspace_x.path(), "key-a", &[]))
        .await
        .unwrap();
    // Y restores last, so the shared file now names key-b.
    RestorePhase::new(&store, &job_y, &archiver)
        .run(&restore_request(workspace_y.path(), "key-b", &[]))
        .await
        .unwrap();

    write_file(workspace_x.path(), "target/out", "from x");
    let saved = SavePhase::new(&store, &job_x, &archiver)
        .run(&save_request(workspace_x.path(), "key-a"))
        .await
        .unwrap();

    match saved {
        SaveOutcome::Saved { object, .. } => assert_eq!(object, "acme/widgets/key-a.tar"),
        other => panic!("expected an upload, got {:?}", other),
    }
    assert!(store.data(BUCKET, "acme/widgets/key-b.tar").is_none());
    // Save consumes the handoff.
    assert!(!state_file.exists());
}

#[tokio::test]
async fn test_exact_handoff_for_another_key_does_not_skip() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let env = MemoryEnvironment::new();

    Handoff::new(&env)
        .save(&HandoffState {
            cache_hit_kind: MatchKind::Exact,
            target_object_name: "acme/widgets/key-b.tar".into(),
            bucket: BUCKET.into(),
            source_paths: "target".into(),
            root_dir: String::new(),
        })
        .unwrap();
    write_file(workspace.path(), "target/out", "data");

    let outcome = SavePhase::new(&store, &env, &archiver)
        .run(&save_request(workspace.path(), "key-a"))
        .await
        .unwrap();

    assert!(matches!(outcome, SaveOutcome::Saved { ref object, .. } if object == "acme/widgets/key-a.tar"));
    assert_eq!(Handoff::new(&env).load().unwrap(), HandoffState::default());
}

#[tokio::test]
async fn test_zstd_archive_on_host_without_zstd_fails_extract() {
    let archiver = archiver();

    for method in [CompressionMethod::Zstd, CompressionMethod::ZstdWithoutLong] {
        let store = MemoryStore::new();
        let workspace = tempfile::tempdir().unwrap();
        let env = MemoryEnvironment::new();
        store.insert(
            BUCKET,
            "acme/widgets/build-1.tar",
            Utc::now(),
            b"zstd frames".to_vec(),
            ObjectMetadata::for_compression(method),
        );

        let err = RestorePhase::new(&store, &env, &archiver)
            .run(&restore_request(workspace.path(), "build-1", &[]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Archive {
                stage: ArchiveStage::Extract,
                ..
            }
        ));
        // No gzip fallback: nothing lands in the workspace.
        assert!(!workspace.path().join("target").exists());
    }
}

#[tokio::test]
async fn test_zstd_round_trip() {
    if !ZstdProber::default().probe_zstd().await.is_available() {
        eprintln!("zstd not installed; skipping");
        return;
    }
    let store = MemoryStore::new();
    let archiver = Archiver::default();

    let job1 = tempfile::tempdir().unwrap();
    write_file(job1.path(), "target/release/app", "optimised");
    let saved = SavePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&save_request(job1.path(), "z-1"))
        .await
        .unwrap();
    let compression = match saved {
        SaveOutcome::Saved { compression, .. } => compression,
        other => panic!("expected an upload, got {:?}", other),
    };
    assert!(compression.uses_zstd());

    let job2 = tempfile::tempdir().unwrap();
    let outcome = RestorePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .run(&restore_request(job2.path(), "z-1", &[]))
        .await
        .unwrap();
    assert_eq!(outcome.compression, Some(compression));
    assert_eq!(
        std::fs::read_to_string(job2.path().join("target/release/app")).unwrap(),
        "optimised"
    );
}

#[tokio::test]
async fn test_gzip_archive_restores_on_zstd_capable_host() {
    let store = MemoryStore::new();

    let job1 = tempfile::tempdir().unwrap();
    write_file(job1.path(), "target/out", "gzipped");
    SavePhase::new(&store, &MemoryEnvironment::new(), &archiver())
        .run(&save_request(job1.path(), "g-1"))
        .await
        .unwrap();

    // The recorded method decides, whatever the restoring host offers.
    let job2 = tempfile::tempdir().unwrap();
    let outcome = RestorePhase::new(&store, &MemoryEnvironment::new(), &Archiver::default())
        .run(&restore_request(job2.path(), "g-1", &[]))
        .await
        .unwrap();

    assert_eq!(outcome.compression, Some(CompressionMethod::Gzip));
    assert_eq!(
        std::fs::read_to_string(job2.path().join("target/out")).unwrap(),
        "gzipped"
    );
}

#[tokio::test]
async fn test_failed_restore_removes_downloaded_archive() {
    let store = MemoryStore::new();
    let archiver = archiver();
    let workspace = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    store.insert(
        BUCKET,
        "acme/widgets/build-1.tar",
        Utc::now(),
        b"garbage".to_vec(),
        ObjectMetadata::for_compression(CompressionMethod::Gzip),
    );

    let result = RestorePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .with_temp_dir(scratch.path())
        .run(&restore_request(workspace.path(), "build-1", &[]))
        .await;

    assert!(result.is_err());
    assert_eq!(store.calls().download, 1);
    assert!(is_empty_dir(scratch.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_save_removes_archive() {
    let store = MemoryStore::new();
    let archiver = archiver().with_tar_program("false");
    let workspace = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    write_file(workspace.path(), "target/out", "data");

    let err = SavePhase::new(&store, &MemoryEnvironment::new(), &archiver)
        .with_temp_dir(scratch.path())
        .run(&save_request(workspace.path(), "build-1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Archive {
            stage: ArchiveStage::Create,
            ..
        }
    ));
    assert_eq!(store.calls().upload, 0);
    assert!(is_empty_dir(scratch.path()));
}
