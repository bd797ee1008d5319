//! GitHub Actions job environment.
//!
//! Outputs and state are appended to the files named by `GITHUB_OUTPUT` and
//! `GITHUB_STATE`; the runner exposes saved state to later steps of the same
//! action as `STATE_<name>` variables.

use chrono::Utc;
use keystash_core::{Error, JobEnvironment, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct GithubActions {
    output_file: Option<PathBuf>,
    state_file: Option<PathBuf>,
    state_vars: HashMap<String, String>,
}

impl GithubActions {
    pub fn new(
        output_file: Option<PathBuf>,
        state_file: Option<PathBuf>,
        state_vars: HashMap<String, String>,
    ) -> Self {
        Self {
            output_file,
            state_file,
            state_vars,
        }
    }

    /// Capture the runner's files and `STATE_*` variables.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| {
            std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        let state_vars = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix("STATE_").map(|name| (name.to_string(), v)))
            .collect();

        Self::new(non_empty("GITHUB_OUTPUT"), non_empty("GITHUB_STATE"), state_vars)
    }

    /// Whether the current process runs inside GitHub Actions.
    pub fn detected() -> bool {
        std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true")
    }
}

/// Heredoc-style `name<<delimiter` record used by the runner's env files.
fn file_command_record(name: &str, value: &str) -> String {
    let delimiter = format!(
        "ghadelimiter_{}_{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    format!("{name}<<{delimiter}\n{value}\n{delimiter}\n")
}

fn append(path: &Path, record: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::State(format!("Failed to open {}: {}", path.display(), e)))?;
    file.write_all(record.as_bytes())
        .and_then(|_| file.sync_data())
        .map_err(|e| Error::State(format!("Failed to write {}: {}", path.display(), e)))
}

/// Escape data for a workflow command.
fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Escape a workflow command property.
fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}

impl JobEnvironment for GithubActions {
    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        match &self.output_file {
            Some(path) => append(path, &file_command_record(name, value)),
            None => {
                println!("::set-output name={}::{}", escape_property(name), escape_data(value));
                Ok(())
            }
        }
    }

    fn save_state(&self, name: &str, value: &str) -> Result<()> {
        match &self.state_file {
            Some(path) => append(path, &file_command_record(name, value)),
            None => {
                println!("::save-state name={}::{}", escape_property(name), escape_data(value));
                Ok(())
            }
        }
    }

    fn save_states(&self, entries: &[(&str, &str)]) -> Result<()> {
        match &self.state_file {
            Some(path) => {
                let records: String = entries
                    .iter()
                    .map(|(name, value)| file_command_record(name, value))
                    .collect();
                append(path, &records)
            }
            None => entries
                .iter()
                .try_for_each(|(name, value)| self.save_state(name, value)),
        }
    }

    fn get_state(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state_vars.get(name).cloned())
    }

    // The runner drops saved state when the job ends.
    fn clear_state(&self, _names: &[&str]) -> Result<()> {
        Ok(())
    }

    fn start_group(&self, title: &str) {
        println!("::group::{}", escape_data(title));
    }

    fn end_group(&self) {
        println!("::endgroup::");
    }

    fn set_failed(&self, message: &str) {
        println!("::error::{}", escape_data(message));
    }
}
