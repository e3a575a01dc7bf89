//
// source_cache.rs
//
// Disk content cache for files that are not open in the editor
//

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use lru::LruCache;

/// Default number of files kept in memory
const DEFAULT_CAPACITY: usize = 4096;

/// Snapshot metadata for a closed file, used to determine cache validity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSnapshot {
    pub mtime: SystemTime,
    pub size: u64,
    pub content_hash: Option<u64>,
}

impl FileSnapshot {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
            content_hash: None,
        }
    }

    pub fn with_content_hash(metadata: &std::fs::Metadata, content: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Self {
            content_hash: Some(hasher.finish()),
            ..Self::from_metadata(metadata)
        }
    }

    /// Freshness is decided by mtime and size only
    pub fn matches_disk(&self, current: &FileSnapshot) -> bool {
        self.mtime == current.mtime && self.size == current.size
    }
}

#[derive(Debug, Clone)]
struct CachedSource {
    snapshot: FileSnapshot,
    content: Arc<str>,
}

/// Bounded cache of on-disk file contents keyed by normalized path.
///
/// Reads always stat the file first, so edits made outside the editor are
/// picked up on the next pass.
pub struct SourceCache {
    inner: Mutex<LruCache<PathBuf, CachedSource>>,
}

impl std::fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCache").finish_non_exhaustive()
    }
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        let cap = NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Current disk content of `path`, served from cache when still fresh.
    /// `None` when the file does not exist or is unreadable.
    pub fn read(&self, path: &Path) -> Option<Arc<str>> {
        let current = get_file_snapshot(path)?;
        if let Some(content) = self.get_if_fresh(path, &current) {
            return Some(content);
        }
        self.read_and_cache(path)
    }

    pub fn get_if_fresh(&self, path: &Path, current: &FileSnapshot) -> Option<Arc<str>> {
        let mut guard = self.inner.lock().ok()?;
        guard.get(path).and_then(|cached| {
            if cached.snapshot.matches_disk(current) {
                Some(cached.content.clone())
            } else {
                None
            }
        })
    }

    pub fn insert(&self, path: PathBuf, snapshot: FileSnapshot, content: Arc<str>) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.put(path, CachedSource { snapshot, content });
        }
    }

    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.pop(path);
        }
    }

    pub fn invalidate_all(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_and_cache(&self, path: &Path) -> Option<Arc<str>> {
        let content = std::fs::read_to_string(path).ok()?;
        let metadata = std::fs::metadata(path).ok()?;
        let snapshot = FileSnapshot::with_content_hash(&metadata, &content);
        let content: Arc<str> = Arc::from(content);
        self.insert(path.to_path_buf(), snapshot, content.clone());
        Some(content)
    }
}

pub fn get_file_snapshot(path: &Path) -> Option<FileSnapshot> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    Some(FileSnapshot::from_metadata(&metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_matches_ignores_hash() {
        let a = FileSnapshot {
            mtime: SystemTime::UNIX_EPOCH,
            size: 100,
            content_hash: None,
        };
        let b = FileSnapshot {
            content_hash: Some(42),
            ..a.clone()
        };
        assert!(a.matches_disk(&b));
        let c = FileSnapshot { size: 101, ..a.clone() };
        assert!(!a.matches_disk(&c));
    }

    #[test]
    fn test_read_missing_file() {
        let cache = SourceCache::new();
        assert!(cache.read(Path::new("/definitely/not/here.sv")).is_none());
    }

    #[test]
    fn test_read_caches_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("top.sv");
        std::fs::write(&file, "module top; endmodule\n").unwrap();

        let cache = SourceCache::new();
        assert_eq!(cache.read(&file).as_deref(), Some("module top; endmodule\n"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.read(&file).as_deref(), Some("module top; endmodule\n"));
    }

    #[test]
    fn test_read_picks_up_size_change() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("top.sv");
        std::fs::write(&file, "a").unwrap();
        let cache = SourceCache::new();
        assert_eq!(cache.read(&file).as_deref(), Some("a"));

        std::fs::write(&file, "abc").unwrap();
        assert_eq!(cache.read(&file).as_deref(), Some("abc"));
    }

    #[test]
    fn test_deleted_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("gone.sv");
        std::fs::write(&file, "x").unwrap();
        let cache = SourceCache::new();
        assert!(cache.read(&file).is_some());
        std::fs::remove_file(&file).unwrap();
        assert!(cache.read(&file).is_none());
    }

    #[test]
    fn test_capacity_bound() {
        let cache = SourceCache::with_capacity(2);
        for name in ["a", "b", "c"] {
            let snap = FileSnapshot {
                mtime: SystemTime::UNIX_EPOCH,
                size: 1,
                content_hash: None,
            };
            cache.insert(PathBuf::from(format!("/p/{}.sv", name)), snap, Arc::from(name));
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_directory_is_not_a_source() {
        let dir = TempDir::new().unwrap();
        assert!(get_file_snapshot(dir.path()).is_none());
    }
}
