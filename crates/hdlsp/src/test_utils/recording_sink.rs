//! A `ClientSink` that records everything the server sends, in order.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tower_lsp::lsp_types::Diagnostic;
use url::Url;

use crate::notifications::{ClientSink, ServerNotice};

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Diagnostics { uri: Url, diagnostics: Vec<Diagnostic> },
    Notice(ServerNotice),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Drain the recorded events
    pub fn take(&self) -> Vec<SinkEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn notices(&self) -> Vec<ServerNotice> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Notice(notice) => Some(notice),
                SinkEvent::Diagnostics { .. } => None,
            })
            .collect()
    }

    /// Every publication for `path`, oldest first
    pub fn publications_for(&self, path: &Path) -> Vec<Vec<Diagnostic>> {
        let Ok(target) = Url::from_file_path(path) else {
            return Vec::new();
        };
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Diagnostics { uri, diagnostics } if uri == target => Some(diagnostics),
                _ => None,
            })
            .collect()
    }

    /// File of every publication, oldest first
    pub fn published_files(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Diagnostics { uri, .. } => uri.to_file_path().ok(),
                SinkEvent::Notice(_) => None,
            })
            .collect()
    }

    pub fn last_diagnostics(&self, path: &Path) -> Option<Vec<Diagnostic>> {
        self.publications_for(path).pop()
    }

    /// Number of publications sent, for any file
    pub fn publication_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, SinkEvent::Diagnostics { .. }))
            .count()
    }
}

#[async_trait::async_trait]
impl ClientSink for RecordingSink {
    async fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Diagnostics { uri, diagnostics });
    }

    async fn notify(&self, notice: ServerNotice) {
        self.events.lock().unwrap().push(SinkEvent::Notice(notice));
    }
}
