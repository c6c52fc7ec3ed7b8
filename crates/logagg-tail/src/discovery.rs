//! Glob-based source file discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

/// A source file matched on this pass, with the first pattern that matched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub pattern: String,
}

/// Expand `patterns` into the current set of source files.
///
/// Only regular files are returned, canonicalized and deduplicated, sorted by
/// path. Aggregate outputs (stem ending in `output_suffix`) are never sources.
/// Entries that cannot be read are logged and skipped.
pub fn discover(patterns: &[String], output_suffix: &str) -> Vec<DiscoveredFile> {
    let mut found: BTreeMap<PathBuf, String> = BTreeMap::new();

    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid glob pattern, skipping");
                continue;
            }
        };

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(
                        path = %e.path().display(),
                        error = %e.error(),
                        "cannot read path during discovery, skipping"
                    );
                    continue;
                }
            };

            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat matched file, skipping");
                    continue;
                }
            }

            if is_aggregate_output(&path, output_suffix) {
                continue;
            }

            let path = std::fs::canonicalize(&path).unwrap_or(path);
            found.entry(path).or_insert_with(|| pattern.clone());
        }
    }

    found
        .into_iter()
        .map(|(path, pattern)| DiscoveredFile { path, pattern })
        .collect()
}

/// Whether `path` is an aggregate file produced for some source.
pub fn is_aggregate_output(path: &Path, output_suffix: &str) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.ends_with(output_suffix))
}
