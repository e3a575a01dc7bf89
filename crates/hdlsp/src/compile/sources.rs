//
// compile/sources.rs
//
// Source access for one recompile pass: open buffers shadow disk content,
// include names resolve against the files eligible for compilation.
//

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::unit::SourceProvider;
use crate::document_store::DocumentSnapshot;
use crate::paths::{is_path_part_of_path, normalize_path};
use crate::source_cache::SourceCache;

#[derive(Debug)]
pub struct PassSources {
    universe: Arc<BTreeSet<PathBuf>>,
    documents: DocumentSnapshot,
    cache: Arc<SourceCache>,
    excluded: Vec<PathBuf>,
    by_file_name: HashMap<OsString, Vec<PathBuf>>,
}

impl PassSources {
    /// `universe` holds every file a pass may compile or inline; `excluded`
    /// holds absolute excluded paths, which never resolve even if they exist.
    pub fn new(
        universe: Arc<BTreeSet<PathBuf>>,
        documents: DocumentSnapshot,
        cache: Arc<SourceCache>,
        excluded: Vec<PathBuf>,
    ) -> Self {
        let mut by_file_name: HashMap<OsString, Vec<PathBuf>> = HashMap::new();
        for path in universe.iter() {
            if let Some(name) = path.file_name() {
                by_file_name
                    .entry(name.to_os_string())
                    .or_default()
                    .push(path.clone());
            }
        }
        Self {
            universe,
            documents,
            cache,
            excluded,
            by_file_name,
        }
    }

    pub fn universe(&self) -> &BTreeSet<PathBuf> {
        &self.universe
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| is_path_part_of_path(path, ex))
    }

    /// Shortest, then lexicographically first, tracked path ending in `rel`
    fn suffix_match(&self, rel: &Path) -> Option<PathBuf> {
        let name = rel.file_name()?;
        self.by_file_name
            .get(name)?
            .iter()
            .filter(|candidate| candidate.ends_with(rel))
            .min_by(|a, b| {
                a.components()
                    .count()
                    .cmp(&b.components().count())
                    .then_with(|| a.cmp(b))
            })
            .cloned()
    }
}

impl SourceProvider for PassSources {
    fn source(&self, path: &Path) -> Option<Arc<str>> {
        self.documents.text(path).or_else(|| self.cache.read(path))
    }

    fn resolve_include(&self, name: &str, from_dir: &Path) -> Option<PathBuf> {
        let rel = normalize_path(Path::new(name));
        if rel.is_absolute() {
            let known = self.universe.contains(&rel) || rel.is_file();
            return (known && !self.is_excluded(&rel)).then_some(rel);
        }

        let direct = normalize_path(&from_dir.join(&rel));
        if self.universe.contains(&direct) {
            return Some(direct);
        }
        self.suffix_match(&rel)
    }

    fn revision(&self, path: &Path) -> Option<u64> {
        self.documents.revision(path)
    }
}
