//! Object store adapters.

mod filesystem;
mod memory;
mod s3;

pub use filesystem::FilesystemStore;
pub use memory::{MemoryStore, StoreCalls};
pub use s3::{S3Settings, S3Store};
