//! Job environment for runs outside a CI runner.
//!
//! State is kept in a JSON file that is replaced atomically on every write,
//! so a killed process leaves either the previous or the new state.

use keystash_core::{Error, JobEnvironment, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub struct LocalEnvironment {
    state_file: PathBuf,
}

impl LocalEnvironment {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    fn read_state(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read(&self.state_file) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::State(format!(
                "Failed to read {}: {}",
                self.state_file.display(),
                e
            ))),
        }
    }

    fn write_state(&self, state: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.state_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::State(format!("Failed to create {}: {}", dir.display(), e)))?;

        let mut staged = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| Error::State(format!("Failed to stage state: {}", e)))?;
        staged
            .write_all(&serde_json::to_vec_pretty(state)?)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| Error::State(format!("Failed to write state: {}", e)))?;
        staged
            .persist(&self.state_file)
            .map_err(|e| Error::State(format!("Failed to persist state: {}", e.error)))?;
        Ok(())
    }
}

impl JobEnvironment for LocalEnvironment {
    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        info!(output = name, value, "Step output");
        Ok(())
    }

    fn save_state(&self, name: &str, value: &str) -> Result<()> {
        self.save_states(&[(name, value)])
    }

    fn save_states(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut state = self.read_state()?;
        for (name, value) in entries {
            state.insert(name.to_string(), value.to_string());
        }
        self.write_state(&state)
    }

    fn get_state(&self, name: &str) -> Result<Option<String>> {
        Ok(self.read_state()?.remove(name))
    }

    fn clear_state(&self, names: &[&str]) -> Result<()> {
        let mut state = self.read_state()?;
        for name in names {
            state.remove(*name);
        }
        if !state.is_empty() {
            return self.write_state(&state);
        }
        match std::fs::remove_file(&self.state_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::State(format!(
                "Failed to remove {}: {}",
                self.state_file.display(),
                e
            ))),
        }
    }

    fn start_group(&self, title: &str) {
        info!("{}", title);
    }

    fn end_group(&self) {}

    fn set_failed(&self, message: &str) {
        error!("{}", message);
    }
}
