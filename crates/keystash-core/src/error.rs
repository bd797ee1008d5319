//! Error types for keystash.

use std::fmt;
use thiserror::Error;

/// Direction of an object-store transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStage {
    Download,
    Upload,
}

impl fmt::Display for TransportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportStage::Download => f.write_str("download"),
            TransportStage::Upload => f.write_str("upload"),
        }
    }
}

/// Archive tool invocation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStage {
    Create,
    Extract,
}

impl fmt::Display for ArchiveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveStage::Create => f.write_str("create"),
            ArchiveStage::Extract => f.write_str("extract"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // Resolution errors
    #[error("Cache resolution failed: {0}")]
    Resolution(String),

    // Only ever surfaced as a soft miss by the restore phase.
    #[error("Invalid cache metadata: {0}")]
    Metadata(String),

    // Transfer errors
    #[error("Cache {stage} failed: {message}")]
    Transport {
        stage: TransportStage,
        message: String,
    },

    // Archive tool errors
    #[error("Archive {stage} failed: {message}")]
    Archive { stage: ArchiveStage, message: String },

    // Input errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Job environment errors
    #[error("State handoff error: {0}")]
    State(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn download(message: impl Into<String>) -> Self {
        Error::Transport {
            stage: TransportStage::Download,
            message: message.into(),
        }
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Error::Transport {
            stage: TransportStage::Upload,
            message: message.into(),
        }
    }

    pub fn create(message: impl Into<String>) -> Self {
        Error::Archive {
            stage: ArchiveStage::Create,
            message: message.into(),
        }
    }

    pub fn extract(message: impl Into<String>) -> Self {
        Error::Archive {
            stage: ArchiveStage::Extract,
            message: message.into(),
        }
    }

    /// Whether the restore phase may downgrade this error to a cache miss.
    pub fn is_soft_miss(&self) -> bool {
        matches!(self, Error::Metadata(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
