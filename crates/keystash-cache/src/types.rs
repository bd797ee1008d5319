//! Cache requests and phase outcomes.

use keystash_core::{CacheObject, CompressionMethod, MatchKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of candidate resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: MatchKind,
    pub object: Option<CacheObject>,
}

impl Resolution {
    pub fn exact(object: CacheObject) -> Self {
        Self {
            kind: MatchKind::Exact,
            object: Some(object),
        }
    }

    pub fn partial(object: CacheObject) -> Self {
        Self {
            kind: MatchKind::Partial,
            object: Some(object),
        }
    }

    pub fn none() -> Self {
        Self {
            kind: MatchKind::None,
            object: None,
        }
    }
}

/// Request to restore a cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRestoreRequest {
    /// Bucket holding the archives.
    pub bucket: String,
    /// Object namespace, usually `owner/repo`.
    pub namespace: String,
    /// Primary cache key.
    pub key: String,
    /// Fallback key prefixes, most specific first.
    #[serde(default)]
    pub restore_keys: Vec<String>,
    /// Path patterns, carried through to the save phase.
    pub path: String,
    /// Optional root directory override, as given by the caller.
    #[serde(default)]
    pub root_dir: String,
    /// Job workspace; `root_dir` is resolved against it.
    pub workspace: PathBuf,
}

impl CacheRestoreRequest {
    /// Directory archives are extracted into.
    pub fn effective_root(&self) -> PathBuf {
        effective_root(&self.workspace, &self.root_dir)
    }
}

/// Request to save a cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSaveRequest {
    pub bucket: String,
    /// Object namespace; may be empty when the handoff names the target.
    #[serde(default)]
    pub namespace: String,
    /// Cache key; may be empty when the handoff names the target.
    #[serde(default)]
    pub key: String,
    /// Newline separated path patterns.
    pub path: String,
    #[serde(default)]
    pub root_dir: String,
    /// Job workspace; `root_dir` is resolved against it.
    pub workspace: PathBuf,
}

/// Resolve an optional root directory override against the workspace.
pub fn effective_root(workspace: &Path, root_dir: &str) -> PathBuf {
    let root_dir = root_dir.trim();
    if root_dir.is_empty() {
        workspace.to_path_buf()
    } else {
        workspace.join(root_dir)
    }
}

/// Result of a restore phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub kind: MatchKind,
    /// Object that was extracted, if any.
    pub restored_object: Option<String>,
    pub compression: Option<CompressionMethod>,
    /// Time taken to restore in milliseconds.
    pub duration_ms: u64,
}

/// Why a save phase did not upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The restore phase found an exact match.
    ExactHit,
    /// The object appeared after the restore phase ran.
    AlreadyExists,
    /// No files matched the path patterns.
    NothingToCache,
}

/// Result of a save phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved {
        object: String,
        compression: CompressionMethod,
        size_bytes: u64,
        duration_ms: u64,
    },
    Skipped(SkipReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_root() {
        let ws = Path::new("/work/repo");
        assert_eq!(effective_root(ws, ""), PathBuf::from("/work/repo"));
        assert_eq!(effective_root(ws, "  "), PathBuf::from("/work/repo"));
        assert_eq!(effective_root(ws, "app"), PathBuf::from("/work/repo/app"));
        assert_eq!(effective_root(ws, "/opt/cache"), PathBuf::from("/opt/cache"));
    }
}
