//! In-memory job environment for tests.

use keystash_core::{JobEnvironment, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryEnvironment {
    state: Mutex<HashMap<String, String>>,
    outputs: Mutex<HashMap<String, String>>,
    groups: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self, name: &str) -> Option<String> {
        lock(&self.outputs).get(name).cloned()
    }

    /// Titles of every group opened so far.
    pub fn groups(&self) -> Vec<String> {
        lock(&self.groups).clone()
    }

    pub fn failure(&self) -> Option<String> {
        lock(&self.failure).clone()
    }
}

impl JobEnvironment for MemoryEnvironment {
    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        lock(&self.outputs).insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn save_state(&self, name: &str, value: &str) -> Result<()> {
        lock(&self.state).insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn get_state(&self, name: &str) -> Result<Option<String>> {
        Ok(lock(&self.state).get(name).cloned())
    }

    fn clear_state(&self, names: &[&str]) -> Result<()> {
        let mut state = lock(&self.state);
        for name in names {
            state.remove(*name);
        }
        Ok(())
    }

    fn start_group(&self, title: &str) {
        lock(&self.groups).push(title.to_string());
    }

    fn end_group(&self) {}

    fn set_failed(&self, message: &str) {
        *lock(&self.failure) = Some(message.to_string());
    }
}
