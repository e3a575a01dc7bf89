//
// publisher.rs
//
// Diagnostics publication: LSP conversion, suppression, explicit clears and
// the record of what each file last received
//

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tower_lsp::lsp_types::{Diagnostic, NumberOrString, Url};

use crate::compile::HdlDiagnostic;
use crate::paths::{is_path_part_of_path, path_to_uri};

/// One `textDocument/publishDiagnostics` ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub uri: Url,
    pub diagnostics: Vec<Diagnostic>,
}

/// Filters taken from project state when a batch is published
#[derive(Debug, Clone, Default)]
pub struct PublishFilter {
    pub source: String,
    /// Absolute excluded paths
    pub excluded: Vec<PathBuf>,
    /// Diagnostic names hidden project-wide
    pub suppressed: BTreeSet<String>,
}

impl PublishFilter {
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| is_path_part_of_path(path, ex))
    }

    pub fn is_suppressed(&self, name: &str) -> bool {
        self.suppressed.contains(name)
    }
}

pub fn to_lsp_diagnostic(diagnostic: &HdlDiagnostic, source: &str) -> Diagnostic {
    Diagnostic {
        range: diagnostic.range,
        severity: Some(diagnostic.severity),
        code: Some(NumberOrString::String(diagnostic.name.as_str().to_string())),
        source: Some(source.to_string()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
pub struct DiagnosticsPublisher {
    /// Diagnostics each file last received, after filtering
    published: RwLock<HashMap<PathBuf, Vec<HdlDiagnostic>>>,
}

impl DiagnosticsPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter `diagnostics` for `path`, record them and build the
    /// publication. Excluded files always get an empty set.
    pub fn prepare(
        &self,
        path: &Path,
        diagnostics: Vec<HdlDiagnostic>,
        filter: &PublishFilter,
    ) -> Option<Publication> {
        let uri = path_to_uri(path)?;
        let kept: Vec<HdlDiagnostic> = if filter.is_excluded(path) {
            Vec::new()
        } else {
            diagnostics
                .into_iter()
                .filter(|d| !filter.is_suppressed(d.name.as_str()))
                .collect()
        };

        let lsp = kept.iter().map(|d| to_lsp_diagnostic(d, &filter.source)).collect();
        self.record(path, kept);
        Some(Publication {
            uri,
            diagnostics: lsp,
        })
    }

    /// Explicit empty publication for `path`
    pub fn clear(&self, path: &Path) -> Option<Publication> {
        let uri = path_to_uri(path)?;
        self.record(path, Vec::new());
        Some(Publication {
            uri,
            diagnostics: Vec::new(),
        })
    }

    /// Forget everything, returning clears for every file that currently
    /// shows diagnostics
    pub fn reset(&self) -> Vec<Publication> {
        let previous = std::mem::take(&mut *self.published.write().unwrap_or_else(PoisonError::into_inner));
        previous
            .into_iter()
            .filter(|(_, diagnostics)| !diagnostics.is_empty())
            .filter_map(|(path, _)| {
                Some(Publication {
                    uri: path_to_uri(&path)?,
                    diagnostics: Vec::new(),
                })
            })
            .collect()
    }

    pub fn last_published(&self, path: &Path) -> Option<Vec<HdlDiagnostic>> {
        self.published.read().unwrap_or_else(PoisonError::into_inner).get(path).cloned()
    }

    /// Files whose last publication was non-empty
    pub fn files_with_diagnostics(&self) -> Vec<PathBuf> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, diagnostics)| !diagnostics.is_empty())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Distinct names of the diagnostics last published on 0-based `line`
    pub fn names_on_line(&self, path: &Path, line: u32) -> Vec<String> {
        let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
        let Some(diagnostics) = published.get(path) else {
            log::warn!("No diagnostics for {}:{}", path.display(), line);
            return Vec::new();
        };

        let mut names: Vec<String> = Vec::new();
        for diagnostic in diagnostics.iter().filter(|d| d.range.start.line == line) {
            let name = diagnostic.name.as_str();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    fn record(&self, path: &Path, diagnostics: Vec<HdlDiagnostic>) {
        // Empty entries are kept so line queries on clean files stay quiet
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), diagnostics);
    }
}
