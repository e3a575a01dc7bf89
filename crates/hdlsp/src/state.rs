//
// state.rs
//
// Copyright (C) 2024-2026 Posit Software, PBC. All rights reserved.
// Modifications copyright (C) 2026 Jonathan Marc Bearak
//

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tower_lsp::lsp_types::DiagnosticSeverity;

use crate::compile::{CompileEngine, Declaration, HdlDiagnostic, PassInput, PassSources, SourceProvider};
use crate::config::ServerConfig;
use crate::document_store::DocumentStore;
use crate::license::LicenseGate;
use crate::paths::is_hdl_file;
use crate::perf::{self, TimingGuard};
use crate::project::scan::ScanLimits;
use crate::project::{MacroTable, ProjectSession};
use crate::publisher::{DiagnosticsPublisher, PublishFilter};
use crate::revalidation::RevalidationState;
use crate::source_cache::SourceCache;

/// Which files a recompile pass starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassMode {
    /// Document event: the given files and whatever depends on them
    AutoFlush(BTreeSet<PathBuf>),
    /// Explicit recompile: the project's pending dirty set and whatever
    /// depends on it. Files the engine has never seen are compiled too, so
    /// the first pass after a project opens covers everything. Requires a
    /// valid license.
    Full,
}

/// Consistent copy of everything a pass reads, taken under the write lock
pub struct PassSnapshot {
    pub sources: PassSources,
    pub macros: MacroTable,
    pub macro_redefined_severity: DiagnosticSeverity,
    pub dirty: BTreeSet<PathBuf>,
    pub compile_added: bool,
    pub cross_file: bool,
}

/// Diagnostics for one file as computed by a pass
#[derive(Debug, Clone)]
pub struct ComputedFile {
    pub path: PathBuf,
    pub diagnostics: Vec<HdlDiagnostic>,
    /// Buffer revision the pass saw, `None` for disk content
    pub revision: Option<u64>,
}

/// Everything one pass hands back to the server
#[derive(Debug, Default)]
pub struct ComputedPass {
    pub files: Vec<ComputedFile>,
    /// Design units known after the pass
    pub declarations: Vec<Declaration>,
}

/// Global server state
pub struct WorldState {
    pub config: ServerConfig,
    pub documents: DocumentStore,
    pub license: LicenseGate,
    /// The open project, replaced wholesale by `setProjectPath`
    pub project: Option<ProjectSession>,
    pub source_cache: Arc<SourceCache>,
    pub publisher: DiagnosticsPublisher,
    pub revalidation: RevalidationState,
    /// Design units as of the last pass, for navigation and completion
    pub declarations: Vec<Declaration>,
}

impl WorldState {
    pub fn new(config: ServerConfig, license: LicenseGate) -> Self {
        Self {
            config,
            documents: DocumentStore::new(),
            license,
            project: None,
            source_cache: Arc::new(SourceCache::new()),
            publisher: DiagnosticsPublisher::new(),
            revalidation: RevalidationState::new(),
            declarations: Vec::new(),
        }
    }

    pub fn scan_limits(&self) -> ScanLimits {
        ScanLimits {
            max_scan_files: self.config.max_scan_files,
            max_project_files: self.config.max_project_files,
        }
    }

    /// Filters for publishing against the current project state
    pub fn publish_filter(&self) -> PublishFilter {
        match &self.project {
            Some(project) => project.publish_filter(&self.config.diagnostic_source),
            None => PublishFilter {
                source: self.config.diagnostic_source.clone(),
                ..Default::default()
            },
        }
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.project
            .as_ref()
            .map_or(false, |project| project.is_excluded(path))
    }

    /// Snapshot project state for a pass. `None` when the pass may not run:
    /// a full pass needs a valid license and keeps the dirty set until then.
    pub fn prepare_pass(&mut self, mode: PassMode) -> Option<PassSnapshot> {
        let licensed = self.license.is_valid();
        let full = mode == PassMode::Full;
        let documents = self.documents.snapshot();

        let dirty = match mode {
            PassMode::Full if !licensed => {
                log::info!("Recompile deferred until the license is valid");
                return None;
            }
            PassMode::Full => {
                self.source_cache.invalidate_all();
                self.project
                    .as_mut()
                    .map(ProjectSession::take_dirty)
                    .unwrap_or_default()
            }
            PassMode::AutoFlush(paths) => {
                for path in &paths {
                    self.source_cache.invalidate(path);
                }
                paths
            }
        };

        let (sources, macros) = match &self.project {
            Some(project) => (
                project.pass_sources(documents, self.source_cache.clone()),
                project.macros().clone(),
            ),
            None => {
                // No project: open buffers compile on their own
                let universe: BTreeSet<PathBuf> = documents
                    .paths()
                    .filter(|path| is_hdl_file(path))
                    .cloned()
                    .collect();
                (
                    PassSources::new(Arc::new(universe), documents, self.source_cache.clone(), Vec::new()),
                    MacroTable::new(),
                )
            }
        };

        Some(PassSnapshot {
            dirty,
            compile_added: full,
            sources,
            macros,
            macro_redefined_severity: self.config.macro_redefined_severity,
            cross_file: licensed,
        })
    }
}

/// Run a pass on the blocking pool's thread and collect what to publish
pub fn compute_pass(engine: &Mutex<CompileEngine>, snapshot: PassSnapshot) -> ComputedPass {
    let _timing = TimingGuard::with_threshold("recompile pass", 500);
    let start = Instant::now();
    let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);

    let outcome = engine.run_pass(PassInput {
        universe: snapshot.sources.universe(),
        sources: &snapshot.sources,
        macros: &snapshot.macros,
        macro_redefined_severity: snapshot.macro_redefined_severity,
        dirty: snapshot.dirty,
        compile_added: snapshot.compile_added,
        cross_file: snapshot.cross_file,
    });

    let files: Vec<ComputedFile> = outcome
        .touched
        .into_iter()
        .map(|path| ComputedFile {
            diagnostics: engine.diagnostics_for(&path),
            revision: snapshot.sources.revision(&path),
            path,
        })
        .collect();

    perf::record_pass(start.elapsed(), outcome.compiled.len(), files.len());
    log::debug!(
        "Pass compiled {} units, {} files to publish",
        outcome.compiled.len(),
        files.len()
    );
    ComputedPass {
        files,
        declarations: engine.declarations(),
    }
}
