//
// document_store.rs
//
// Editor-buffer overrides for project files
//
// Open documents are authoritative: while a file is open its buffer text
// replaces whatever is on disk. Closing a document drops the override and
// the file falls back to its disk content.
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ropey::Rope;

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DocumentStoreMetrics {
    pub documents_opened: u64,
    pub documents_closed: u64,
    pub updates: u64,
    /// Updates that arrived for a path that was never opened
    pub orphan_updates: u64,
}

// ============================================================================
// Document State
// ============================================================================

/// State for an open document
#[derive(Debug, Clone)]
pub struct DocumentState {
    pub path: PathBuf,
    /// LSP document version
    pub version: i32,
    pub contents: Rope,
    /// Store-wide monotonic revision of the last write to this document
    pub revision: u64,
}

impl DocumentState {
    pub fn text(&self) -> String {
        self.contents.to_string()
    }
}

/// Immutable view of every open buffer, taken for one compile pass.
#[derive(Debug, Clone, Default)]
pub struct DocumentSnapshot {
    texts: HashMap<PathBuf, (u64, Arc<str>)>,
}

impl DocumentSnapshot {
    pub fn text(&self, path: &Path) -> Option<Arc<str>> {
        self.texts.get(path).map(|(_, text)| text.clone())
    }

    pub fn revision(&self, path: &Path) -> Option<u64> {
        self.texts.get(path).map(|(rev, _)| *rev)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.texts.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.texts.keys()
    }
}

// ============================================================================
// Document Store
// ============================================================================

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<PathBuf, DocumentState>,
    next_revision: u64,
    metrics: DocumentStoreMetrics,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    /// Register or overwrite the buffer for `path`. Returns the new revision.
    pub fn open(&mut self, path: PathBuf, text: &str, version: i32) -> u64 {
        let revision = self.bump_revision();
        log::trace!("DocumentStore: open {} (rev {})", path.display(), revision);
        self.documents.insert(
            path.clone(),
            DocumentState {
                path,
                version,
                contents: Rope::from_str(text),
                revision,
            },
        );
        self.metrics.documents_opened += 1;
        revision
    }

    /// Replace the whole buffer (full-document sync).
    ///
    /// An update for a path that is not open is treated as an open, since
    /// some clients send `didChange` for files they never opened.
    pub fn update(&mut self, path: &Path, text: &str, version: i32) -> u64 {
        let revision = self.bump_revision();
        match self.documents.get_mut(path) {
            Some(doc) => {
                doc.contents = Rope::from_str(text);
                doc.version = version;
                doc.revision = revision;
                self.metrics.updates += 1;
            }
            None => {
                log::debug!(
                    "DocumentStore: update for unopened {}, treating as open",
                    path.display()
                );
                self.metrics.orphan_updates += 1;
                self.documents.insert(
                    path.to_path_buf(),
                    DocumentState {
                        path: path.to_path_buf(),
                        version,
                        contents: Rope::from_str(text),
                        revision,
                    },
                );
            }
        }
        revision
    }

    /// Drop the override for `path`, returning its last state.
    pub fn close(&mut self, path: &Path) -> Option<DocumentState> {
        let removed = self.documents.remove(path);
        if removed.is_some() {
            self.metrics.documents_closed += 1;
        }
        removed
    }

    pub fn get(&self, path: &Path) -> Option<&DocumentState> {
        self.documents.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    pub fn text(&self, path: &Path) -> Option<String> {
        self.documents.get(path).map(DocumentState::text)
    }

    pub fn revision(&self, path: &Path) -> Option<u64> {
        self.documents.get(path).map(|d| d.revision)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.documents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn metrics(&self) -> &DocumentStoreMetrics {
        &self.metrics
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            texts: self
                .documents
                .iter()
                .map(|(path, doc)| (path.clone(), (doc.revision, Arc::from(doc.text()))))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str) -> PathBuf {
        PathBuf::from(format!("/project/{}", name))
    }

    #[test]
    fn test_open_and_get() {
        let mut store = DocumentStore::new();
        store.open(path("top.sv"), "module top; endmodule", 1);
        assert!(store.contains(&path("top.sv")));
        assert_eq!(
            store.text(&path("top.sv")).as_deref(),
            Some("module top; endmodule")
        );
        assert_eq!(store.get(&path("top.sv")).unwrap().version, 1);
        assert_eq!(store.metrics().documents_opened, 1);
    }

    #[test]
    fn test_reopen_overwrites() {
        let mut store = DocumentStore::new();
        let r1 = store.open(path("top.sv"), "a", 1);
        let r2 = store.open(path("top.sv"), "b", 1);
        assert!(r2 > r1);
        assert_eq!(store.text(&path("top.sv")).as_deref(), Some("b"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_replaces_wholesale() {
        let mut store = DocumentStore::new();
        let r1 = store.open(path("top.sv"), "module a; endmodule", 1);
        let r2 = store.update(&path("top.sv"), "module b; endmodule", 2);
        assert!(r2 > r1);
        let doc = store.get(&path("top.sv")).unwrap();
        assert_eq!(doc.text(), "module b; endmodule");
        assert_eq!(doc.version, 2);
        assert_eq!(doc.revision, r2);
    }

    #[test]
    fn test_update_unopened_acts_as_open() {
        let mut store = DocumentStore::new();
        store.update(&path("new.sv"), "x", 3);
        assert!(store.contains(&path("new.sv")));
        assert_eq!(store.metrics().orphan_updates, 1);
    }

    #[test]
    fn test_close_removes_override() {
        let mut store = DocumentStore::new();
        store.open(path("top.sv"), "x", 1);
        let closed = store.close(&path("top.sv")).unwrap();
        assert_eq!(closed.text(), "x");
        assert!(!store.contains(&path("top.sv")));
        assert!(store.close(&path("top.sv")).is_none());
        assert_eq!(store.metrics().documents_closed, 1);
    }

    #[test]
    fn test_revisions_are_store_wide_monotonic() {
        let mut store = DocumentStore::new();
        let a = store.open(path("a.sv"), "", 1);
        let b = store.open(path("b.sv"), "", 1);
        let a2 = store.update(&path("a.sv"), "x", 2);
        assert!(a < b && b < a2);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut store = DocumentStore::new();
        let rev = store.open(path("a.sv"), "old", 1);
        let snap = store.snapshot();
        store.update(&path("a.sv"), "new", 2);

        assert_eq!(snap.text(&path("a.sv")).as_deref(), Some("old"));
        assert_eq!(snap.revision(&path("a.sv")), Some(rev));
        assert_ne!(store.revision(&path("a.sv")), Some(rev));
    }
}
