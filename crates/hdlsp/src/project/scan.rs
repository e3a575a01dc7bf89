//
// project/scan.rs
//
// Walk the project root for HDL files
//

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use walkdir::{DirEntry, WalkDir};

use crate::paths::{is_hdl_file, is_path_part_of_path, normalize_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    /// Directory entries visited before the walk stops
    pub max_scan_files: usize,
    /// HDL files collected before the walk stops
    pub max_project_files: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub files: BTreeSet<PathBuf>,
    /// Set to the limit that stopped the walk, if any
    pub limit_hit: Option<usize>,
    pub entries_visited: usize,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.starts_with('.'))
}

/// Collect HDL files under `root`, pruning hidden directories and anything
/// under an `excluded` path. Excluded single files are still collected so the
/// resource set can track them as excluded.
pub fn scan_project(root: &Path, excluded: &BTreeSet<PathBuf>, limits: ScanLimits) -> ScanResult {
    let start = Instant::now();
    let mut result = ScanResult::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if is_hidden(entry) {
                return false;
            }
            // Files stay visible so explicit file exclusions remain tracked
            !entry.file_type().is_dir()
                || !excluded.iter().any(|ex| is_path_part_of_path(entry.path(), ex))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Skipping unreadable entry during scan: {}", e);
                continue;
            }
        };

        result.entries_visited += 1;
        if result.entries_visited > limits.max_scan_files {
            result.limit_hit = Some(limits.max_scan_files);
            break;
        }

        if !entry.file_type().is_file() || !is_hdl_file(entry.path()) {
            continue;
        }
        if result.files.len() >= limits.max_project_files {
            result.limit_hit = Some(limits.max_project_files);
            break;
        }
        result.files.insert(normalize_path(entry.path()));
    }

    let elapsed = start.elapsed();
    crate::perf::record_scan(elapsed, result.files.len());
    log::info!(
        "Scanned {} ({} entries, {} HDL files) in {:?}",
        root.display(),
        result.entries_visited,
        result.files.len(),
        elapsed
    );
    result
}
