//
// project/session.rs
//
// One open project: roots, resources, macros and the batched dirty set
//

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::dotfile::Dotfile;
use super::macros::{Macro, MacroTable};
use super::resources::{ResourceDelta, ResourceSet};
use super::scan::ScanLimits;
use super::ProjectError;
use crate::compile::PassSources;
use crate::document_store::DocumentSnapshot;
use crate::paths::{is_hdl_file, is_path_part_of_path, normalize_path};
use crate::publisher::PublishFilter;
use crate::source_cache::SourceCache;

/// Follow-up work a project mutation leaves for the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassRequest {
    /// Files whose diagnostics must be cleared right away
    pub cleared: BTreeSet<PathBuf>,
    /// Files were added to or removed from the project
    pub structure_changed: bool,
    /// Scan limit hit for the first time in this session
    pub limit_warning: Option<usize>,
}

#[derive(Debug)]
pub struct ProjectSession {
    /// Files under the principal root
    resources: ResourceSet,
    /// Roots added with `compiler/addRootUnit`, keyed by their path
    imports: BTreeMap<PathBuf, ResourceSet>,
    macros: MacroTable,
    suppressions: BTreeSet<String>,
    /// Files waiting for the next explicit recompile
    dirty: BTreeSet<PathBuf>,
    limit_warned: bool,
}

impl ProjectSession {
    /// Open the project at `root`: load its dotfile and discover its files.
    /// Every included file starts dirty.
    pub fn open(root: &Path, limits: ScanLimits) -> Result<(Self, PassRequest), ProjectError> {
        let root = normalize_path(root);
        if !root.is_dir() {
            return Err(ProjectError::NotFound(root));
        }

        let mut session = Self {
            resources: ResourceSet::new(root.clone(), limits),
            imports: BTreeMap::new(),
            macros: MacroTable::new(),
            suppressions: BTreeSet::new(),
            dirty: BTreeSet::new(),
            limit_warned: false,
        };

        let dotfile = Dotfile::load_or_default(&root);
        let (_, mut delta) = session.apply_dotfile(&dotfile);
        delta.merge(session.rescan_all());
        let request = session.absorb(delta);
        session.mark_all_dirty();

        log::info!(
            "Opened project {} ({} files, {} imported roots, {} excluded paths, {} macros)",
            root.display(),
            session.sets().map(ResourceSet::len).sum::<usize>(),
            session.imports.len(),
            session.sets().map(|set| set.exclusions().len()).sum::<usize>(),
            session.macros.len()
        );
        Ok((session, request))
    }

    pub fn root(&self) -> &Path {
        self.resources.root()
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    /// Paths of the imported roots
    pub fn imports(&self) -> impl Iterator<Item = &PathBuf> {
        self.imports.keys()
    }

    /// Principal resources first, then every imported root
    fn sets(&self) -> impl Iterator<Item = &ResourceSet> {
        std::iter::once(&self.resources).chain(self.imports.values())
    }

    fn set_for_mut(&mut self, path: &Path) -> &mut ResourceSet {
        match self
            .imports
            .iter_mut()
            .find(|(root, _)| is_path_part_of_path(path, root))
        {
            Some((_, set)) => set,
            None => &mut self.resources,
        }
    }

    fn is_under_any_root(&self, path: &Path) -> bool {
        self.sets().any(|set| set.is_under_root(path))
    }

    fn all_exclusions(&self) -> Vec<PathBuf> {
        self.sets()
            .flat_map(|set| set.exclusions().iter().cloned())
            .collect()
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    pub fn is_suppressed(&self, name: &str) -> bool {
        self.suppressions.contains(name)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.sets().any(|set| set.is_excluded(path))
    }

    /// Files eligible for compilation: included tracked files of every root
    /// plus open buffers under a root that no exclusion covers
    pub fn universe<'a>(&self, open: impl IntoIterator<Item = &'a PathBuf>) -> BTreeSet<PathBuf> {
        let mut universe: BTreeSet<PathBuf> = self
            .sets()
            .flat_map(|set| set.included_files())
            .cloned()
            .collect();
        universe.extend(
            open.into_iter()
                .filter(|path| is_hdl_file(path) && self.is_under_any_root(path) && !self.is_excluded(path))
                .cloned(),
        );
        universe
    }

    /// Sources for one pass over this project
    pub fn pass_sources(&self, documents: DocumentSnapshot, cache: Arc<SourceCache>) -> PassSources {
        let universe = Arc::new(self.universe(documents.paths()));
        PassSources::new(universe, documents, cache, self.all_exclusions())
    }

    pub fn publish_filter(&self, source: &str) -> PublishFilter {
        PublishFilter {
            source: source.to_string(),
            excluded: self.all_exclusions(),
            suppressed: self.suppressions.clone(),
        }
    }

    pub fn dirty(&self) -> &BTreeSet<PathBuf> {
        &self.dirty
    }

    pub fn mark_dirty(&mut self, path: PathBuf) {
        self.dirty.insert(path);
    }

    pub fn mark_all_dirty(&mut self) {
        let included: Vec<PathBuf> = self
            .sets()
            .flat_map(|set| set.included_files())
            .cloned()
            .collect();
        self.dirty.extend(included);
    }

    pub fn take_dirty(&mut self) -> BTreeSet<PathBuf> {
        std::mem::take(&mut self.dirty)
    }

    pub fn exclude(&mut self, path: &Path) -> Result<PassRequest, ProjectError> {
        let (mut dotfile, mut delta) = self.refresh_from_dotfile();
        let result = self.set_for_mut(path).exclude(path);
        if let Ok(change) = &result {
            log::info!("Excluded {}", path.display());
            delta.merge(change.clone());
            self.write_dotfile(&mut dotfile);
        }
        let request = self.absorb(delta);
        result.map(|_| request)
    }

    pub fn include(&mut self, path: &Path) -> Result<PassRequest, ProjectError> {
        let (mut dotfile, mut delta) = self.refresh_from_dotfile();
        let result = self.set_for_mut(path).include(path);
        if let Ok(change) = &result {
            log::info!("Included {}", path.display());
            delta.merge(change.clone());
            self.write_dotfile(&mut dotfile);
        }
        let request = self.absorb(delta);
        result.map(|_| request)
    }

    /// Add `path` as another compilation root. It may neither lie inside
    /// an existing root nor contain one.
    pub fn add_root_unit(&mut self, path: &Path) -> Result<PassRequest, ProjectError> {
        let path = normalize_path(path);
        if !path.exists() {
            return Err(ProjectError::NotFound(path));
        }
        if self.is_under_any_root(&path) {
            return Err(ProjectError::WithinRoot(path));
        }
        if self.sets().any(|set| is_path_part_of_path(set.root(), &path)) {
            return Err(ProjectError::ParentOfRoot(path));
        }
        if !path.is_dir() {
            return Err(ProjectError::NotADirectory(path));
        }

        let (mut dotfile, mut delta) = self.refresh_from_dotfile();
        let mut set = ResourceSet::new(path.clone(), self.resources.limits());
        delta.merge(set.rescan());
        log::info!("Added root unit {} ({} files)", path.display(), set.len());
        self.imports.insert(path, set);
        self.write_dotfile(&mut dotfile);
        Ok(self.absorb(delta))
    }

    /// Drop an imported root and every file under it from the project
    pub fn remove_root_unit(&mut self, path: &Path) -> Result<PassRequest, ProjectError> {
        let path = normalize_path(path);
        if !path.exists() {
            return Err(ProjectError::NotFound(path));
        }
        if path == self.root() {
            return Err(ProjectError::PrincipalRoot(path));
        }

        let (mut dotfile, mut delta) = self.refresh_from_dotfile();
        let Some(mut set) = self.imports.remove(&path) else {
            self.absorb(delta);
            return Err(ProjectError::NotARoot(path));
        };
        delta.merge(set.forget_all());
        log::info!("Removed root unit {}", path.display());
        self.write_dotfile(&mut dotfile);
        Ok(self.absorb(delta))
    }

    /// Replace the macro table. Returns whether the effective definitions
    /// changed. Every included file becomes dirty either way.
    pub fn set_macros(&mut self, macros: Vec<Macro>) -> bool {
        let (mut dotfile, delta) = self.refresh_from_dotfile();
        let changed = self.macros.replace(macros);
        log::info!("Project macros: {:?}", self.macros.defines());
        self.write_dotfile(&mut dotfile);
        self.absorb(delta);
        self.mark_all_dirty();
        changed
    }

    /// Re-read the dotfile and rediscover the project files
    pub fn reload_dotfile(&mut self) -> PassRequest {
        let dotfile = Dotfile::load_or_default(self.root());
        let (settings_changed, mut delta) = self.apply_dotfile(&dotfile);
        delta.merge(self.rescan_all());
        let request = self.absorb(delta);
        if settings_changed {
            self.mark_all_dirty();
        }
        request
    }

    /// Drop a closed buffer's file from the project if it was deleted from
    /// disk. Returns whether the project structure changed.
    pub fn forget_if_missing(&mut self, path: &Path) -> bool {
        let forgotten = self.set_for_mut(path).forget_if_missing(path);
        if forgotten {
            log::info!("Removed deleted file {}", path.display());
            self.dirty.remove(path);
        }
        forgotten
    }

    /// Walk every root again, e.g. after the scan limits changed
    pub fn rescan(&mut self, limits: ScanLimits) -> PassRequest {
        self.resources.set_limits(limits);
        for set in self.imports.values_mut() {
            set.set_limits(limits);
        }
        let delta = self.rescan_all();
        self.absorb(delta)
    }

    fn rescan_all(&mut self) -> ResourceDelta {
        let mut delta = self.resources.rescan();
        for set in self.imports.values_mut() {
            delta.merge(set.rescan());
        }
        delta
    }

    /// Make the imported roots match `entries`. New roots start empty until
    /// the next rescan; the returned delta covers the files of dropped ones.
    fn set_imports(&mut self, entries: &[String]) -> ResourceDelta {
        let wanted: BTreeSet<PathBuf> = entries
            .iter()
            .map(|entry| normalize_path(Path::new(entry)))
            .filter(|path| {
                let usable = path.is_absolute() && path.is_dir();
                if !usable {
                    log::warn!("Ignoring imported root {}", path.display());
                }
                usable
            })
            .collect();

        let mut delta = ResourceDelta::default();
        let dropped: Vec<PathBuf> = self
            .imports
            .keys()
            .filter(|root| !wanted.contains(*root))
            .cloned()
            .collect();
        for root in dropped {
            if let Some(mut set) = self.imports.remove(&root) {
                delta.merge(set.forget_all());
            }
        }

        for root in wanted {
            if self.imports.contains_key(&root) {
                continue;
            }
            if self.is_under_any_root(&root)
                || self.sets().any(|set| is_path_part_of_path(set.root(), &root))
            {
                log::warn!("Ignoring imported root {} nested with another root", root.display());
                continue;
            }
            let set = ResourceSet::new(root.clone(), self.resources.limits());
            self.imports.insert(root, set);
        }
        delta
    }

    /// Apply roots, exclusions, macros and suppressions from `dotfile`.
    /// Returns whether macros or suppressions changed, and the files of
    /// imported roots the dotfile no longer lists.
    fn apply_dotfile(&mut self, dotfile: &Dotfile) -> (bool, ResourceDelta) {
        let delta = self.set_imports(&dotfile.imports);
        let root = self.root().to_path_buf();
        self.resources.set_relative_exclusions(&root, &dotfile.exclude_paths);
        for set in self.imports.values_mut() {
            set.set_relative_exclusions(&root, &dotfile.exclude_paths);
        }
        let macros_changed = self.macros.replace(dotfile.macros.iter().cloned());
        let suppressions: BTreeSet<String> = dotfile.project_suppressions.iter().cloned().collect();
        let suppressions_changed = suppressions != self.suppressions;
        self.suppressions = suppressions;
        (macros_changed || suppressions_changed, delta)
    }

    /// Pick up edits other tools made to the dotfile before it is rewritten
    fn refresh_from_dotfile(&mut self) -> (Dotfile, ResourceDelta) {
        let dotfile = match Dotfile::load(self.root()) {
            Ok(Some(dotfile)) => dotfile,
            Ok(None) => return (Dotfile::default(), ResourceDelta::default()),
            Err(e) => {
                log::warn!("Ignoring dotfile: {}", e);
                return (Dotfile::default(), ResourceDelta::default());
            }
        };
        let before = (self.all_exclusions(), self.imports.keys().cloned().collect::<Vec<_>>());
        let (settings_changed, mut delta) = self.apply_dotfile(&dotfile);
        if settings_changed {
            self.mark_all_dirty();
        }
        let after = (self.all_exclusions(), self.imports.keys().cloned().collect::<Vec<_>>());
        if after != before {
            log::debug!("Dotfile roots or exclusions changed on disk, rescanning");
            delta.merge(self.rescan_all());
        }
        (dotfile, delta)
    }

    fn write_dotfile(&self, dotfile: &mut Dotfile) {
        dotfile.exclude_paths = self.resources.relative_exclusions();
        dotfile.exclude_paths.extend(
            self.imports
                .values()
                .flat_map(|set| set.exclusions().iter())
                .map(|path| path.display().to_string()),
        );
        dotfile.imports = self.imports.keys().map(|root| root.display().to_string()).collect();
        dotfile.macros = self.macros.to_macros();
        dotfile.project_suppressions = self.suppressions.iter().cloned().collect();
        if let Err(e) = dotfile.save(self.root()) {
            log::error!("Failed to write dotfile: {}", e);
        }
    }

    fn absorb(&mut self, delta: ResourceDelta) -> PassRequest {
        self.dirty.extend(delta.now_included.iter().cloned());
        self.dirty.extend(delta.now_excluded.iter().cloned());
        self.dirty.extend(delta.removed.iter().cloned());

        let limit_warning = match delta.limit_hit {
            Some(limit) if !self.limit_warned => {
                self.limit_warned = true;
                Some(limit)
            }
            _ => None,
        };

        PassRequest {
            structure_changed: delta.structure_changed(),
            cleared: delta.now_excluded,
            limit_warning,
        }
    }
}
