//! Job environment adapters.

mod github;
mod local;
mod memory;

pub use github::GithubActions;
pub use local::LocalEnvironment;
pub use memory::MemoryEnvironment;
