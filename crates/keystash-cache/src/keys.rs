//! Cache key and namespace utilities.

use keystash_core::{Error, Result};

/// Split a comma- or newline-delimited restore key list.
///
/// Entries are trimmed and empty entries dropped; order is preserved because
/// it defines fallback priority.
pub fn parse_restore_keys(input: &str) -> Vec<String> {
    input
        .split([',', '\n'])
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check if an object name matches a prefix pattern.
pub fn matches_prefix(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
}

/// Derive the object namespace from an `owner/repo` repository identity.
pub fn namespace_from_repository(repository: &str) -> Result<String> {
    let repository = repository.trim().trim_matches('/');
    match repository.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok(format!("{}/{}", owner, repo))
        }
        _ => Err(Error::Configuration(format!(
            "Repository identity must look like 'owner/repo', got {:?}",
            repository
        ))),
    }
}
