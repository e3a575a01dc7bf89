//
// project/resources.rs
//
// Tracked project files and their inclusion state
//
// Exclusions are a list of paths (files or directories) under the project
// root. A tracked file is included unless it lies under an exclusion.
// Excluding a directory subsumes exclusions beneath it; including a path
// beneath an excluded directory splits that directory into exclusions of
// everything except the requested path.
//

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::scan::{scan_project, ScanLimits};
use super::ProjectError;
use crate::paths::{is_path_part_of_path, normalize_path, relative_to_root};

/// Changes to the tracked set and inclusion flags caused by one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDelta {
    /// Newly tracked files
    pub added: BTreeSet<PathBuf>,
    /// Files no longer on disk
    pub removed: BTreeSet<PathBuf>,
    /// Files that became included (including newly tracked ones)
    pub now_included: BTreeSet<PathBuf>,
    /// Files that were included and no longer are
    pub now_excluded: BTreeSet<PathBuf>,
    /// Scan limit reached during the rescan, if any
    pub limit_hit: Option<usize>,
}

impl ResourceDelta {
    pub fn structure_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.structure_changed() && self.now_included.is_empty() && self.now_excluded.is_empty()
    }

    /// Fold a later delta into this one. A later transition overrides an
    /// earlier one for the same file.
    pub fn merge(&mut self, later: ResourceDelta) {
        for path in later.added {
            self.removed.remove(&path);
            self.added.insert(path);
        }
        for path in later.removed {
            self.added.remove(&path);
            self.removed.insert(path);
        }
        for path in later.now_included {
            self.now_excluded.remove(&path);
            self.now_included.insert(path);
        }
        for path in later.now_excluded {
            self.now_included.remove(&path);
            self.now_excluded.insert(path);
        }
        self.limit_hit = later.limit_hit.or(self.limit_hit);
    }
}

#[derive(Debug)]
pub struct ResourceSet {
    root: PathBuf,
    /// Tracked files and their included flag
    files: BTreeMap<PathBuf, bool>,
    excluded: BTreeSet<PathBuf>,
    limits: ScanLimits,
}

impl ResourceSet {
    pub fn new(root: PathBuf, limits: ScanLimits) -> Self {
        Self {
            root: normalize_path(&root),
            files: BTreeMap::new(),
            excluded: BTreeSet::new(),
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> ScanLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: ScanLimits) {
        self.limits = limits;
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn is_included(&self, path: &Path) -> bool {
        self.files.get(path).copied().unwrap_or(false)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| is_path_part_of_path(path, ex))
    }

    pub fn is_under_root(&self, path: &Path) -> bool {
        is_path_part_of_path(path, &self.root)
    }

    pub fn exclusions(&self) -> &BTreeSet<PathBuf> {
        &self.excluded
    }

    pub fn included_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files
            .iter()
            .filter(|(_, included)| **included)
            .map(|(path, _)| path)
    }

    pub fn tracked_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Exclusions as stored in the dotfile
    pub fn relative_exclusions(&self) -> Vec<String> {
        self.excluded
            .iter()
            .filter_map(|path| relative_to_root(path, &self.root))
            .collect()
    }

    /// Replace the exclusion list from dotfile entries, relative to `base`
    /// or absolute. Entries under another root are skipped; entries that do
    /// not exist on disk are dropped with a warning.
    pub fn set_relative_exclusions(&mut self, base: &Path, entries: &[String]) {
        self.excluded = entries
            .iter()
            .map(|entry| normalize_path(&base.join(entry)))
            .filter(|path| self.is_under_root(path))
            .filter(|path| {
                let exists = path.exists();
                if !exists {
                    log::warn!("Excluded path does not exist: {}", path.display());
                }
                exists
            })
            .collect();
    }

    /// Stop tracking `path` if it no longer exists on disk. Returns whether
    /// it was tracked.
    pub fn forget_if_missing(&mut self, path: &Path) -> bool {
        if path.exists() {
            return false;
        }
        self.files.remove(path).is_some()
    }

    /// Stop tracking everything, e.g. when this root leaves the project
    pub fn forget_all(&mut self) -> ResourceDelta {
        let files = std::mem::take(&mut self.files);
        let mut delta = ResourceDelta::default();
        for (path, included) in files {
            if included {
                delta.now_excluded.insert(path.clone());
            }
            delta.removed.insert(path);
        }
        delta
    }

    /// Walk the root again and diff against the tracked set
    pub fn rescan(&mut self) -> ResourceDelta {
        let scan = scan_project(&self.root, &self.excluded, self.limits);
        let mut delta = ResourceDelta {
            limit_hit: scan.limit_hit,
            ..Default::default()
        };

        let mut next = BTreeMap::new();
        for path in scan.files {
            let included = !self.is_excluded(&path);
            match self.files.get(&path) {
                None => {
                    delta.added.insert(path.clone());
                    if included {
                        delta.now_included.insert(path.clone());
                    }
                }
                Some(&was_included) => {
                    if included && !was_included {
                        delta.now_included.insert(path.clone());
                    } else if !included && was_included {
                        delta.now_excluded.insert(path.clone());
                    }
                }
            }
            next.insert(path, included);
        }

        for (path, was_included) in &self.files {
            if next.contains_key(path) {
                continue;
            }
            // Pruned by a directory exclusion rather than deleted
            if self.is_excluded(path) && path.exists() {
                if *was_included {
                    delta.now_excluded.insert(path.clone());
                }
            } else {
                delta.removed.insert(path.clone());
                if *was_included {
                    delta.now_excluded.insert(path.clone());
                }
            }
        }

        self.files = next;
        delta
    }

    fn check_path(&self, path: &Path) -> Result<PathBuf, ProjectError> {
        let path = normalize_path(path);
        if !self.is_under_root(&path) {
            return Err(ProjectError::OutsideRoot {
                path,
                root: self.root.clone(),
            });
        }
        if !path.exists() {
            return Err(ProjectError::NotFound(path));
        }
        Ok(path)
    }

    /// Exclude `path` and everything beneath it, then rescan
    pub fn exclude(&mut self, path: &Path) -> Result<ResourceDelta, ProjectError> {
        let path = self.check_path(path)?;
        if self.is_excluded(&path) {
            log::info!("Path is already excluded: {}", path.display());
            return Ok(ResourceDelta::default());
        }

        self.excluded
            .retain(|ex| !is_path_part_of_path(ex, &path));
        self.excluded.insert(path);
        Ok(self.rescan())
    }

    /// Include `path`, lifting exclusions on it, beneath it, and splitting an
    /// excluded ancestor. Then rescan.
    pub fn include(&mut self, path: &Path) -> Result<ResourceDelta, ProjectError> {
        let path = self.check_path(path)?;

        let ancestor = self
            .excluded
            .iter()
            .find(|ex| **ex != path && is_path_part_of_path(&path, ex))
            .cloned();

        self.excluded
            .retain(|ex| !is_path_part_of_path(ex, &path));

        if let Some(ancestor) = ancestor {
            self.excluded.remove(&ancestor);
            self.exclude_siblings_along(&ancestor, &path)?;
        }
        Ok(self.rescan())
    }

    /// Exclude every child of `dir` except the one leading to `target`,
    /// recursing down that chain.
    fn exclude_siblings_along(&mut self, dir: &Path, target: &Path) -> Result<(), ProjectError> {
        if !dir.is_dir() {
            return Ok(());
        }
        let entries = std::fs::read_dir(dir).map_err(|source| ProjectError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries.flatten() {
            let child = normalize_path(&entry.path());
            if child == target {
                continue;
            }
            if is_path_part_of_path(target, &child) {
                self.exclude_siblings_along(&child, target)?;
            } else {
                self.excluded.insert(child);
            }
        }
        Ok(())
    }
}
