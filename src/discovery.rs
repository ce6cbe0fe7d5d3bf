//! Input discovery: turns the paths given on the command line into input units.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::state_machine::InputUnit;

/// A path that was passed over, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedInput {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub units: Vec<InputUnit>,
    pub skipped: Vec<SkippedInput>,
}

/// Enumerate the input units under `paths`.
///
/// Directories contribute their matching files (non-recursive, sorted by
/// path); files are kept only when their extension matches. Nothing here
/// is an error: unusable paths land in [`Discovery::skipped`].
pub fn discover(paths: &[PathBuf], extension: &str) -> Discovery {
    let mut discovery = Discovery::default();
    let mut seen = HashSet::new();

    for path in paths {
        if path.is_dir() {
            let entries = match fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    discovery.skip(path, format!("cannot read directory: {e}"));
                    continue;
                }
            };

            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            for file in files {
                if has_extension(&file, extension) {
                    discovery.add(file, &mut seen);
                } else {
                    discovery.skip(&file, format!("extension is not .{extension}"));
                }
            }
        } else if path.is_file() {
            if has_extension(path, extension) {
                discovery.add(path.clone(), &mut seen);
            } else {
                discovery.skip(path, format!("extension is not .{extension}"));
            }
        } else {
            discovery.skip(path, "no such file or directory".to_string());
        }
    }

    debug!(
        units = discovery.units.len(),
        skipped = discovery.skipped.len(),
        "input discovery finished"
    );
    discovery
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}

impl Discovery {
    fn add(&mut self, path: PathBuf, seen: &mut HashSet<PathBuf>) {
        if seen.insert(path.clone()) {
            self.units.push(InputUnit::new(path));
        }
    }

    fn skip(&mut self, path: &Path, reason: String) {
        warn!(input = %path.display(), %reason, "skipping input");
        self.skipped.push(SkippedInput {
            path: path.to_path_buf(),
            reason,
        });
    }
}
