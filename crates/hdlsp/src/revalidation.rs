//
// revalidation.rs
//
// Debounced document passes
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

/// Tracks pending debounced passes per file
#[derive(Debug, Default)]
pub struct RevalidationState {
    pending: RwLock<HashMap<PathBuf, CancellationToken>>,
}

impl RevalidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a pass for `path`, cancelling any pending one.
    /// Returns a cancellation token for the new task.
    pub fn schedule(&self, path: PathBuf) -> CancellationToken {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old_token) = pending.remove(&path) {
            old_token.cancel();
        }
        let token = CancellationToken::new();
        pending.insert(path, token.clone());
        token
    }

    pub fn complete(&self, path: &Path) {
        self.pending.write().unwrap_or_else(PoisonError::into_inner).remove(path);
    }

    pub fn cancel(&self, path: &Path) {
        if let Some(token) = self.pending.write().unwrap_or_else(PoisonError::into_inner).remove(path) {
            token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        for (_, token) in pending.drain() {
            token.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
