//! Command handlers.

use crate::commands::{RestoreArgs, SaveArgs, StoreArgs, input_or_env};
use crate::config::{CliConfig, StoreKind};
use console::style;
use keystash_cache::{
    Archiver, CacheRestoreRequest, CacheSaveRequest, FilesystemStore, GithubActions,
    LocalEnvironment, RestoreOutcome, RestorePhase, S3Store, SaveOutcome, SavePhase, SkipReason,
    namespace_from_repository, parse_restore_keys,
};
use keystash_core::{JobEnvironment, MatchKind, ObjectStore};
use std::path::{Path, PathBuf};
use tracing::debug;

const STATE_FILE_NAME: &str = "state.json";

async fn object_store(config: &CliConfig, args: &StoreArgs) -> Box<dyn ObjectStore> {
    match args.store.unwrap_or(config.store.kind) {
        StoreKind::S3 => Box::new(S3Store::new(&config.store.s3).await),
        StoreKind::Filesystem => {
            let store = match args.store_root.as_ref().or(config.store.root.as_ref()) {
                Some(root) => FilesystemStore::new(root),
                None => FilesystemStore::default(),
            };
            debug!(root = %store.root_dir().display(), "Using filesystem store");
            Box::new(store)
        }
    }
}

/// Identifier of the running CI job, when the runner exposes one.
fn job_id_from_env() -> Option<String> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
    var("CI_JOB_ID").or_else(|| {
        var("GITHUB_RUN_ID").map(|run| match var("GITHUB_JOB") {
            Some(job) => format!("{}-{}", run, job),
            None => run,
        })
    })
}

/// State file private to one job: keyed by job id under the data dir, or
/// kept inside the job's workspace.
fn default_state_file(job_id: Option<&str>, workspace: &Path) -> PathBuf {
    let Some(job_id) = job_id else {
        return workspace.join(".keystash").join(STATE_FILE_NAME);
    };
    let job_id: String = job_id
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let data_dir = directories::ProjectDirs::from("dev", "keystash", "keystash")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("keystash"));
    data_dir.join("jobs").join(job_id).join(STATE_FILE_NAME)
}

fn job_environment(args: &StoreArgs, workspace: &Path) -> Box<dyn JobEnvironment> {
    if GithubActions::detected() {
        debug!("Running inside GitHub Actions");
        return Box::new(GithubActions::from_env());
    }
    let state_file = args
        .state_file
        .clone()
        .unwrap_or_else(|| default_state_file(job_id_from_env().as_deref(), workspace));
    let env = LocalEnvironment::new(state_file);
    debug!(state_file = %env.state_file().display(), "Using local job environment");
    Box::new(env)
}

fn workspace(args: &StoreArgs) -> anyhow::Result<PathBuf> {
    match &args.workspace {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.clone()),
        _ => Ok(std::env::current_dir()?),
    }
}

/// Report `result` through the job environment before handing it back.
fn report<T>(env: &dyn JobEnvironment, result: keystash_core::Result<T>) -> anyhow::Result<T> {
    result.map_err(|e| {
        env.set_failed(&e.to_string());
        e.into()
    })
}

/// Restore phase.
pub async fn restore(config: &CliConfig, args: RestoreArgs) -> anyhow::Result<RestoreOutcome> {
    let workspace = workspace(&args.store)?;
    let env = job_environment(&args.store, &workspace);
    let namespace = report(env.as_ref(), namespace_from_repository(&args.namespace))?;
    let request = CacheRestoreRequest {
        bucket: args.bucket.trim().to_string(),
        namespace,
        key: args.key.trim().to_string(),
        restore_keys: parse_restore_keys(&input_or_env(args.restore_keys, "INPUT_RESTORE_KEYS")),
        path: args.path,
        root_dir: input_or_env(args.root_dir, "INPUT_ROOT_DIR"),
        workspace,
    };

    let store = object_store(config, &args.store).await;
    let archiver = Archiver::default();
    let outcome = report(
        env.as_ref(),
        RestorePhase::new(store.as_ref(), env.as_ref(), &archiver)
            .run(&request)
            .await,
    )?;

    match (&outcome.kind, &outcome.restored_object) {
        (MatchKind::None, _) | (_, None) => println!(
            "{} No cache found for key {}",
            style("i").blue(),
            style(&request.key).bold()
        ),
        (kind, Some(object)) => println!(
            "{} Restored {} ({} match, {} ms)",
            style("✓").green(),
            style(object).bold(),
            kind,
            outcome.duration_ms
        ),
    }
    Ok(outcome)
}

/// Save phase.
pub async fn save(config: &CliConfig, args: SaveArgs) -> anyhow::Result<SaveOutcome> {
    let workspace = workspace(&args.store)?;
    let env = job_environment(&args.store, &workspace);
    // Key and namespace are optional; the restore step's target fills the gap.
    let namespace = match args.namespace.as_deref().map(str::trim) {
        Some(repository) if !repository.is_empty() => {
            report(env.as_ref(), namespace_from_repository(repository))?
        }
        _ => String::new(),
    };
    let request = CacheSaveRequest {
        bucket: args.bucket.unwrap_or_default(),
        namespace,
        key: args.key.unwrap_or_default(),
        path: args.path.unwrap_or_default(),
        root_dir: input_or_env(args.root_dir, "INPUT_ROOT_DIR"),
        workspace,
    };

    let store = object_store(config, &args.store).await;
    let archiver = Archiver::default();
    let outcome = report(
        env.as_ref(),
        SavePhase::new(store.as_ref(), env.as_ref(), &archiver)
            .run(&request)
            .await,
    )?;

    match &outcome {
        SaveOutcome::Saved {
            object,
            compression,
            size_bytes,
            duration_ms,
        } => println!(
            "{} Saved {} ({}, {} bytes, {} ms)",
            style("✓").green(),
            style(object).bold(),
            compression,
            size_bytes,
            duration_ms
        ),
        SaveOutcome::Skipped(reason) => {
            let why = match reason {
                SkipReason::ExactHit => "cache was restored by exact match",
                SkipReason::AlreadyExists => "cache key already stored",
                SkipReason::NothingToCache => "no files matched the cache paths",
            };
            println!("{} Skipped upload: {}", style("i").blue(), why);
        }
    }
    Ok(outcome)
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("Current configuration:");
    println!("  store.kind: {:?}", config.store.kind);
    println!(
        "  store.root: {}",
        config
            .store
            .root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!(
        "  store.region: {}",
        config.store.s3.region.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  store.endpoint_url: {}",
        config.store.s3.endpoint_url.as_deref().unwrap_or("(not set)")
    );
    println!("  store.force_path_style: {}", config.store.s3.force_path_style);
    println!("  log_format: {:?}", config.log_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}
