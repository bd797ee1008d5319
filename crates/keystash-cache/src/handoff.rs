//! State handed from the restore phase to the save phase.

use keystash_core::{HandoffState, JobEnvironment, MatchKind, Result};
use tracing::debug;

pub const CACHE_HIT_KIND: &str = "cache-hit-kind";
pub const TARGET_FILE_NAME: &str = "target-file-name";
pub const BUCKET: &str = "bucket";
pub const PATH: &str = "path";
pub const ROOT_DIR: &str = "root-dir";

/// Maps [`HandoffState`] fields onto the job environment's key/value state.
pub struct Handoff<'a> {
    env: &'a dyn JobEnvironment,
}

impl<'a> Handoff<'a> {
    pub fn new(env: &'a dyn JobEnvironment) -> Self {
        Self { env }
    }

    pub fn save(&self, state: &HandoffState) -> Result<()> {
        debug!(?state, "Saving handoff state");

        self.env.save_states(&[
            (CACHE_HIT_KIND, state.cache_hit_kind.as_str()),
            (TARGET_FILE_NAME, state.target_object_name.as_str()),
            (BUCKET, state.bucket.as_str()),
            (PATH, state.source_paths.as_str()),
            (ROOT_DIR, state.root_dir.as_str()),
        ])
    }

    /// Drop every handoff field so a later job cannot read them.
    pub fn clear(&self) -> Result<()> {
        self.env
            .clear_state(&[CACHE_HIT_KIND, TARGET_FILE_NAME, BUCKET, PATH, ROOT_DIR])
    }

    /// Missing fields read as empty strings.
    pub fn load(&self) -> Result<HandoffState> {
        let field = |name: &str| -> Result<String> {
            Ok(self.env.get_state(name)?.unwrap_or_default())
        };

        let state = HandoffState {
            cache_hit_kind: MatchKind::from_state_value(&field(CACHE_HIT_KIND)?),
            target_object_name: field(TARGET_FILE_NAME)?,
            bucket: field(BUCKET)?,
            source_paths: field(PATH)?,
            root_dir: field(ROOT_DIR)?,
        };

        debug!(?state, "Loaded handoff state");
        Ok(state)
    }
}
