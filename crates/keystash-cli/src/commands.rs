//! CLI command definitions.
//!
//! Step inputs can also be supplied through the `INPUT_*` variables GitHub
//! Actions sets for an action's `with:` block.

use crate::config::StoreKind;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Restore the best matching cache archive into the workspace
    Restore(RestoreArgs),

    /// Archive the cache paths and upload them unless the key is already stored
    Save(SaveArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

/// Where archives live and where phase state is kept.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Object store backend, overriding the config file
    #[arg(long, value_enum)]
    pub store: Option<StoreKind>,

    /// Root directory of the filesystem store
    #[arg(long)]
    pub store_root: Option<PathBuf>,

    /// State file used to hand state from restore to save outside GitHub Actions
    #[arg(long, env = "KEYSTASH_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Job workspace; root-dir and relative paths resolve against it
    #[arg(long, env = "GITHUB_WORKSPACE")]
    pub workspace: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Bucket holding the cache archives
    #[arg(long, env = "INPUT_BUCKET")]
    pub bucket: String,

    /// Newline separated paths to cache
    #[arg(long, env = "INPUT_PATH")]
    pub path: String,

    /// Cache key
    #[arg(long, env = "INPUT_KEY")]
    pub key: String,

    /// Ordered key prefixes to fall back on, comma or newline separated
    #[arg(long, env = "INPUT_RESTORE-KEYS")]
    pub restore_keys: Option<String>,

    /// Directory the paths are relative to, inside the workspace
    #[arg(long, env = "INPUT_ROOT-DIR")]
    pub root_dir: Option<String>,

    /// Repository (`owner/repo`) the cache belongs to
    #[arg(long, env = "GITHUB_REPOSITORY")]
    pub namespace: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Bucket holding the cache archives; defaults to the restore step's
    #[arg(long, env = "INPUT_BUCKET")]
    pub bucket: Option<String>,

    /// Newline separated paths to cache; defaults to the restore step's
    #[arg(long, env = "INPUT_PATH")]
    pub path: Option<String>,

    /// Cache key; defaults to the restore step's
    #[arg(long, env = "INPUT_KEY")]
    pub key: Option<String>,

    /// Directory the paths are relative to, inside the workspace
    #[arg(long, env = "INPUT_ROOT-DIR")]
    pub root_dir: Option<String>,

    /// Repository (`owner/repo`) the cache belongs to
    #[arg(long, env = "GITHUB_REPOSITORY")]
    pub namespace: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Read an input, accepting the underscore spelling of hyphenated `INPUT_*`
/// variables as well.
pub fn input_or_env(value: Option<String>, underscore_var: &str) -> String {
    value
        .or_else(|| std::env::var(underscore_var).ok())
        .unwrap_or_default()
}
