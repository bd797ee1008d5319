//! Expansion of cache path patterns into concrete paths.
//!
//! Patterns are newline separated. Blank lines and `#` comments are ignored,
//! a leading `!` excludes, and `~/` expands to the home directory. A directory
//! that matches is returned as a whole; tar recurses into it.

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use keystash_core::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const GLOB_META: [char; 4] = ['*', '?', '[', '{'];

#[derive(Debug, Default, PartialEq, Eq)]
struct Patterns {
    include: Vec<String>,
    exclude: Vec<String>,
}

fn parse_patterns(input: &str) -> Patterns {
    let mut patterns = Patterns::default();
    for line in input.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.strip_prefix('!') {
            Some(rest) if !rest.trim().is_empty() => patterns.exclude.push(rest.trim().to_string()),
            Some(_) => {}
            None => patterns.include.push(line.to_string()),
        }
    }
    patterns
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(GLOB_META)
}

/// Resolve `~/` and make the pattern absolute against `root`.
fn absolutize(pattern: &str, root: &Path) -> PathBuf {
    let pattern = pattern.trim_end_matches('/');
    let expanded = match (pattern.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ if pattern == "~" => std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(pattern)),
        _ => PathBuf::from(pattern),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}

/// Leading components of a pattern that contain no glob syntax.
fn literal_base(pattern: &Path) -> PathBuf {
    let mut base = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if has_glob_meta(&part.to_string_lossy()) {
                break;
            }
        }
        base.push(component);
    }
    base
}

fn matcher(pattern: &Path) -> Result<GlobMatcher> {
    GlobBuilder::new(&pattern.to_string_lossy())
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| Error::Configuration(format!("Invalid path pattern {:?}: {}", pattern, e)))
}

fn exclude_set(patterns: &[String], root: &Path) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let absolute = absolutize(pattern, root);
        let glob = GlobBuilder::new(&absolute.to_string_lossy())
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Configuration(format!("Invalid path pattern {:?}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Configuration(format!("Invalid exclude patterns: {}", e)))
}

fn expand_glob(pattern: &Path, found: &mut BTreeSet<PathBuf>) -> Result<()> {
    let matcher = matcher(pattern)?;
    let base = literal_base(pattern);
    if !base.exists() {
        return Ok(());
    }

    let mut walker = WalkDir::new(&base).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable path");
                continue;
            }
        };
        if matcher.is_match(entry.path()) {
            found.insert(entry.path().to_path_buf());
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
        }
    }
    Ok(())
}

/// Expand newline separated `patterns` against `root`.
///
/// Paths under `root` are returned relative to it; anything outside stays
/// absolute. The result is sorted and free of duplicates.
pub fn collect(patterns: &str, root: &Path) -> Result<Vec<PathBuf>> {
    let patterns = parse_patterns(patterns);
    if patterns.include.is_empty() {
        return Err(Error::Configuration("No path patterns given".into()));
    }

    let mut found = BTreeSet::new();
    for pattern in &patterns.include {
        let absolute = absolutize(pattern, root);
        if has_glob_meta(pattern) {
            expand_glob(&absolute, &mut found)?;
        } else if std::fs::symlink_metadata(&absolute).is_ok() {
            found.insert(absolute);
        } else {
            debug!(pattern = %pattern, "Path does not exist");
        }
    }

    let excluded = exclude_set(&patterns.exclude, root)?;
    let paths: BTreeSet<PathBuf> = found
        .into_iter()
        .filter(|path| !excluded.is_match(path))
        .map(|path| match path.strip_prefix(root) {
            Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
            Ok(relative) => relative.to_path_buf(),
            Err(_) => path,
        })
        .collect();

    debug!(count = paths.len(), "Collected cache paths");
    Ok(paths.into_iter().collect())
}
