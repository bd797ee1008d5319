//! Keystash Core
//!
//! Domain types, port traits, and error handling for keystash.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the cache engine and the command-line front end.

pub mod cache;
pub mod error;
pub mod ports;

pub use cache::{
    CacheObject, CompressionMethod, HandoffState, MatchKind, ObjectMetadata,
    COMPRESSION_METHOD_METADATA_KEY, object_name, object_prefix,
};
pub use error::{ArchiveStage, Error, Result, TransportStage};
pub use ports::{JobEnvironment, ObjectStore, UploadOutcome};
