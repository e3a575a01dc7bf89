//
// compile/dependency.rs
//
// Include graph and reverse-dependency index
//

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::lexer::{lex, TokenKind};

/// Include names written in `text`, in document order. Conditional
/// compilation is ignored, so an include guarded by an inactive `` `ifdef ``
/// still counts. This is the view used to decide which files are roots.
pub fn scan_include_names(text: &str) -> Vec<String> {
    let lexed = lex(text);
    lexed
        .tokens
        .windows(2)
        .filter(|pair| pair[0].kind == TokenKind::Directive && pair[0].text == "include")
        .filter(|pair| pair[1].kind == TokenKind::Str && !pair[1].text.is_empty())
        .map(|pair| pair[1].text.to_string())
        .collect()
}

/// An `` `include `` edge from includer to included file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncludeEdge {
    pub from: PathBuf,
    pub to: PathBuf,
    /// Name as written in the directive
    pub name: String,
}

/// Raw include relationships between tracked files
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward lookup: includer -> edges to included files
    forward: HashMap<PathBuf, Vec<IncludeEdge>>,
    /// Reverse lookup: included file -> edges from includers
    backward: HashMap<PathBuf, Vec<IncludeEdge>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `from`
    pub fn update_file(&mut self, from: &Path, edges: Vec<IncludeEdge>) {
        self.remove_forward_edges(from);
        for edge in edges {
            self.add_edge(edge);
        }
    }

    /// Remove all edges involving a file
    pub fn remove_file(&mut self, path: &Path) {
        self.remove_forward_edges(path);
        if let Some(edges) = self.backward.remove(path) {
            for edge in edges {
                if let Some(forward_edges) = self.forward.get_mut(&edge.from) {
                    forward_edges.retain(|e| e.to != path);
                    if forward_edges.is_empty() {
                        self.forward.remove(&edge.from);
                    }
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
    }

    pub fn get_dependencies(&self, path: &Path) -> Vec<&IncludeEdge> {
        self.forward
            .get(path)
            .map(|edges| edges.iter().collect())
            .unwrap_or_default()
    }

    pub fn get_dependents(&self, path: &Path) -> Vec<&IncludeEdge> {
        self.backward
            .get(path)
            .map(|edges| edges.iter().collect())
            .unwrap_or_default()
    }

    /// Whether some other file includes `path`
    pub fn is_included_by_other(&self, path: &Path) -> bool {
        self.backward
            .get(path)
            .map_or(false, |edges| edges.iter().any(|e| e.from != path))
    }

    /// Files that include `path` directly or indirectly
    pub fn get_transitive_dependents(&self, path: &Path, max_depth: usize) -> Vec<PathBuf> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        self.collect_dependents(path, max_depth, 0, &mut visited, &mut result);
        result
    }

    fn collect_dependents(
        &self,
        path: &Path,
        max_depth: usize,
        current_depth: usize,
        visited: &mut HashSet<PathBuf>,
        result: &mut Vec<PathBuf>,
    ) {
        if current_depth >= max_depth || !visited.insert(path.to_path_buf()) {
            return;
        }
        for edge in self.get_dependents(path) {
            if !visited.contains(&edge.from) {
                result.push(edge.from.clone());
                self.collect_dependents(&edge.from, max_depth, current_depth + 1, visited, result);
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(Vec::len).sum()
    }

    fn add_edge(&mut self, edge: IncludeEdge) {
        log::trace!("Adding include edge: {} -> {}", edge.from.display(), edge.to.display());
        self.forward
            .entry(edge.from.clone())
            .or_default()
            .push(edge.clone());
        self.backward.entry(edge.to.clone()).or_default().push(edge);
    }

    fn remove_forward_edges(&mut self, path: &Path) {
        if let Some(edges) = self.forward.remove(path) {
            for edge in edges {
                if let Some(backward_edges) = self.backward.get_mut(&edge.to) {
                    backward_edges.retain(|e| e.from != path);
                    if backward_edges.is_empty() {
                        self.backward.remove(&edge.to);
                    }
                }
            }
        }
    }

    /// Human-readable dump of all edges, sorted
    pub fn dump_state(&self) -> String {
        let mut output = format!("Include graph ({} edges):\n", self.edge_count());
        let mut includers: Vec<_> = self.forward.keys().collect();
        includers.sort();
        for from in includers {
            output.push_str(&format!("  {}:\n", from.display()));
            for edge in &self.forward[from] {
                output.push_str(&format!("    -> {} (\"{}\")\n", edge.to.display(), edge.name));
            }
        }
        output
    }
}

/// What each compiled unit read, indexed both ways. Populated from compile
/// results, so it tracks includes actually taken under the current macros.
#[derive(Debug, Default)]
pub struct UnitIndex {
    reads: HashMap<PathBuf, BTreeSet<PathBuf>>,
    readers: HashMap<PathBuf, BTreeSet<PathBuf>>,
    /// Unresolved include name -> roots that asked for it
    waiting: HashMap<String, BTreeSet<PathBuf>>,
    missing_by_root: HashMap<PathBuf, BTreeSet<String>>,
}

impl UnitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, root: &Path, files_read: &BTreeSet<PathBuf>, missing: &BTreeSet<String>) {
        self.remove_root(root);
        for file in files_read {
            self.readers
                .entry(file.clone())
                .or_default()
                .insert(root.to_path_buf());
        }
        self.reads.insert(root.to_path_buf(), files_read.clone());
        for name in missing {
            self.waiting
                .entry(name.clone())
                .or_default()
                .insert(root.to_path_buf());
        }
        if !missing.is_empty() {
            self.missing_by_root.insert(root.to_path_buf(), missing.clone());
        }
    }

    /// Forget a root. Returns the files it read.
    pub fn remove_root(&mut self, root: &Path) -> BTreeSet<PathBuf> {
        let files = self.reads.remove(root).unwrap_or_default();
        for file in &files {
            if let Some(roots) = self.readers.get_mut(file) {
                roots.remove(root);
                if roots.is_empty() {
                    self.readers.remove(file);
                }
            }
        }
        if let Some(names) = self.missing_by_root.remove(root) {
            for name in names {
                if let Some(roots) = self.waiting.get_mut(&name) {
                    roots.remove(root);
                    if roots.is_empty() {
                        self.waiting.remove(&name);
                    }
                }
            }
        }
        files
    }

    pub fn clear(&mut self) {
        self.reads.clear();
        self.readers.clear();
        self.waiting.clear();
        self.missing_by_root.clear();
    }

    /// Roots whose last compile read `path`
    pub fn roots_reading(&self, path: &Path) -> impl Iterator<Item = &PathBuf> {
        self.readers.get(path).into_iter().flatten()
    }

    pub fn is_read(&self, path: &Path) -> bool {
        self.readers.contains_key(path)
    }

    /// Roots with an unresolved include that `path` could now satisfy
    pub fn roots_waiting_for(&self, path: &Path) -> BTreeSet<PathBuf> {
        self.waiting
            .iter()
            .filter(|(name, _)| path.ends_with(Path::new(name.as_str())))
            .flat_map(|(_, roots)| roots.iter().cloned())
            .collect()
    }

    pub fn files_read_by(&self, root: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.reads.get(root)
    }
}
