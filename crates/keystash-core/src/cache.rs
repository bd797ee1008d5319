//! Cache types.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Custom metadata key recording how an archive was compressed.
pub const COMPRESSION_METHOD_METADATA_KEY: &str = "Cache-Action-Compression-Method";

/// Object name for an exact cache key: `{namespace}/{key}.tar`.
pub fn object_name(namespace: &str, key: &str) -> String {
    format!("{}/{}.tar", namespace, key)
}

/// Listing prefix for a restore key: `{namespace}/{restore_key}`.
pub fn object_prefix(namespace: &str, restore_key: &str) -> String {
    format!("{}/{}", namespace, restore_key)
}

/// A stored cache archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheObject {
    /// Full object name, including the namespace.
    pub name: String,
    pub last_updated: DateTime<Utc>,
    pub size_bytes: u64,
}

/// How a cache hit was obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Partial,
    #[default]
    None,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Partial => "partial",
            MatchKind::None => "none",
        }
    }

    /// Parse a persisted value. Anything unrecognised, including an empty
    /// string from a missing field, reads as `None`.
    pub fn from_state_value(value: &str) -> Self {
        match value.trim() {
            "exact" => MatchKind::Exact,
            "partial" => MatchKind::Partial,
            _ => MatchKind::None,
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, MatchKind::None)
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression applied by the archive tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionMethod {
    #[serde(rename = "gzip")]
    Gzip,
    #[serde(rename = "zstd (without long)")]
    ZstdWithoutLong,
    #[serde(rename = "zstd")]
    Zstd,
}

impl CompressionMethod {
    /// Value stored in object metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::ZstdWithoutLong => "zstd (without long)",
            CompressionMethod::Zstd => "zstd",
        }
    }

    pub fn uses_zstd(&self) -> bool {
        !matches!(self, CompressionMethod::Gzip)
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "gzip" => Ok(CompressionMethod::Gzip),
            "zstd (without long)" => Ok(CompressionMethod::ZstdWithoutLong),
            "zstd" => Ok(CompressionMethod::Zstd),
            other => Err(Error::Metadata(format!(
                "Unknown compression method: {:?}",
                other
            ))),
        }
    }
}

/// Custom key/value metadata attached to a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectMetadata(HashMap<String, String>);

impl ObjectMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_compression(method: CompressionMethod) -> Self {
        let mut metadata = Self::new();
        metadata.insert(COMPRESSION_METHOD_METADATA_KEY, method.as_str());
        metadata
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Case-insensitive lookup; S3 lower-cases user metadata keys.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Compression method recorded when the archive was created.
    pub fn compression_method(&self) -> Result<CompressionMethod> {
        self.get(COMPRESSION_METHOD_METADATA_KEY)
            .ok_or_else(|| {
                Error::Metadata(format!(
                    "Missing {} metadata",
                    COMPRESSION_METHOD_METADATA_KEY
                ))
            })?
            .parse()
    }
}

impl From<HashMap<String, String>> for ObjectMetadata {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// State carried from the restore phase to the save phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffState {
    pub cache_hit_kind: MatchKind,
    pub target_object_name: String,
    pub bucket: String,
    pub source_paths: String,
    pub root_dir: String,
}
