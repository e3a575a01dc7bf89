//
// backend.rs
//
// Copyright (C) 2022-2026 Posit Software, PBC. All rights reserved.
// Modifications copyright (C) 2026 Jonathan Marc Bearak
//

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::compile::CompileEngine;
use crate::config::{parse_server_config, ServerConfig};
use crate::handlers;
use crate::license::{default_license_path, FileLicenseStore, LicenseEvent, LicenseGate};
use crate::notifications::{ClientSink, ServerNotice};
use crate::paths::{normalize_path, uri_to_path};
use crate::project::{Macro, PassRequest, ProjectSession};
use crate::state::{compute_pass, ComputedFile, PassMode, WorldState};

pub const SERVER_NAME: &str = "HDL Copilot Server";

/// Parameters for `setLicenseKey`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLicenseKeyParams {
    pub license_key: String,
}

/// Parameters for requests naming one path, e.g. `setProjectPath`
#[derive(Debug, Deserialize)]
pub struct PathParams {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SetMacrosParams {
    pub macros: Vec<Macro>,
}

/// Parameters for requests that carry none (`{}`)
#[derive(Debug, Default, Deserialize)]
pub struct EmptyParams {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStringsParams {
    pub file_path: String,
    /// 0-based
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticStringsResult {
    pub names: Vec<String>,
}

/// Client paths arrive either as plain filesystem paths or as `file://` URIs
fn parse_client_path(raw: &str) -> PathBuf {
    if raw.starts_with("file://") {
        if let Some(path) = Url::parse(raw).ok().as_ref().and_then(uri_to_path) {
            return path;
        }
    }
    normalize_path(&PathBuf::from(raw))
}

#[derive(Clone)]
pub struct Backend {
    sink: Arc<dyn ClientSink>,
    state: Arc<RwLock<WorldState>>,
    engine: Arc<Mutex<CompileEngine>>,
    /// Held for the whole of a pass, from snapshot to the last publication.
    /// Project swaps and explicit clears take it too so nothing they publish
    /// can be overtaken by a pass computed against older state.
    pass_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self::with_sink(
            Arc::new(client),
            LicenseGate::with_file_store(default_license_path()),
            ServerConfig::default(),
        )
    }

    /// Build a backend around any sink, e.g. a recorder in tests
    pub fn with_sink(sink: Arc<dyn ClientSink>, license: LicenseGate, config: ServerConfig) -> Self {
        Self {
            sink,
            state: Arc::new(RwLock::new(WorldState::new(config, license))),
            engine: Arc::new(Mutex::new(CompileEngine::new())),
            pass_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn state(&self) -> &Arc<RwLock<WorldState>> {
        &self.state
    }

    /// Run one recompile pass and publish its results.
    ///
    /// The snapshot is taken under the write lock, compilation happens on
    /// the blocking pool without any state lock held, and results are
    /// checked against the current document revisions before they go out.
    /// Files whose buffers moved on during the pass are skipped: the event
    /// that moved them scheduled its own pass.
    async fn run_pass(&self, mode: PassMode) {
        let _pass = self.pass_lock.lock().await;

        let snapshot = self.state.write().await.prepare_pass(mode);
        let Some(snapshot) = snapshot else {
            return;
        };

        let engine = self.engine.clone();
        let computed = match tokio::task::spawn_blocking(move || compute_pass(&engine, snapshot)).await {
            Ok(computed) => computed,
            Err(e) => {
                log::error!("Recompile pass panicked: {}", e);
                return;
            }
        };

        self.state.write().await.declarations = computed.declarations;
        self.publish_computed(computed.files).await;
    }

    async fn publish_computed(&self, computed: Vec<ComputedFile>) {
        let publications: Vec<_> = {
            let state = self.state.read().await;
            let filter = state.publish_filter();
            computed
                .into_iter()
                .filter_map(|file| {
                    if state.documents.revision(&file.path) != file.revision {
                        log::trace!("Skipping stale diagnostics for {}", file.path.display());
                        return None;
                    }
                    state.publisher.prepare(&file.path, file.diagnostics, &filter)
                })
                .collect()
        };

        log::trace!("Publishing diagnostics for {} files", publications.len());
        for publication in publications {
            self.sink
                .publish_diagnostics(publication.uri, publication.diagnostics)
                .await;
        }
    }

    /// Schedule the auto-flush pass for a document event. Runs inline when
    /// debouncing is off, otherwise after the configured quiet period.
    async fn flush_document(&self, path: PathBuf) {
        let (token, debounce_ms) = {
            let state = self.state.read().await;
            (state.revalidation.schedule(path.clone()), state.config.debounce_ms)
        };

        if debounce_ms == 0 {
            self.state.read().await.revalidation.complete(&path);
            self.run_pass(PassMode::AutoFlush(BTreeSet::from([path]))).await;
            return;
        }

        let backend = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::trace!("Debounced pass for {} superseded", path.display());
                }
                _ = tokio::time::sleep(Duration::from_millis(debounce_ms)) => {
                    if token.is_cancelled() {
                        return;
                    }
                    backend.state.read().await.revalidation.complete(&path);
                    backend.run_pass(PassMode::AutoFlush(BTreeSet::from([path]))).await;
                }
            }
        });
    }

    /// Send clears and notices a project mutation left behind
    async fn apply_request(&self, request: PassRequest) {
        let _pass = self.pass_lock.lock().await;

        let clears: Vec<_> = {
            let state = self.state.read().await;
            request
                .cleared
                .iter()
                .filter_map(|path| state.publisher.clear(path))
                .collect()
        };
        for publication in clears {
            self.sink
                .publish_diagnostics(publication.uri, publication.diagnostics)
                .await;
        }

        if request.structure_changed {
            self.sink.notify(ServerNotice::ProjectStructureChanged).await;
        }
        if let Some(limit) = request.limit_warning {
            self.sink.notify(ServerNotice::Warning(limit_message(limit))).await;
        }
    }

    async fn emit_license_events(&self, events: Vec<LicenseEvent>) {
        for event in events {
            self.sink.notify(event.into()).await;
        }
    }

    /// `setLicenseKey`: validate, persist and report. A license that just
    /// became valid triggers a full recompile of the open project.
    pub async fn set_license_key(&self, params: SetLicenseKeyParams) {
        let (events, became_valid) = {
            let mut state = self.state.write().await;
            let was_valid = state.license.is_valid();
            let events = state.license.set_key(&params.license_key);
            let became_valid = !was_valid && state.license.is_valid();
            let has_project = match state.project.as_mut() {
                Some(project) if became_valid => {
                    project.mark_all_dirty();
                    true
                }
                _ => false,
            };
            (events, became_valid && has_project)
        };

        self.emit_license_events(events).await;
        if became_valid {
            self.run_pass(PassMode::Full).await;
        }
    }

    /// `setProjectPath`: replace the open project. Diagnostics of the old
    /// project are cleared and the new one is compiled once the license
    /// allows it.
    pub async fn set_project_path(&self, params: PathParams) {
        let root = parse_client_path(&params.path);
        log::info!("Opening project {}", root.display());

        let licensed = {
            let _pass = self.pass_lock.lock().await;

            let limits = self.state.read().await.scan_limits();
            let opened =
                tokio::task::spawn_blocking(move || ProjectSession::open(&root, limits)).await;
            let (session, request) = match opened {
                Ok(Ok(opened)) => opened,
                Ok(Err(e)) => {
                    log::error!("Failed to open project: {}", e);
                    self.sink.notify(ServerNotice::Warning(e.to_string())).await;
                    return;
                }
                Err(e) => {
                    log::error!("Project scan panicked: {}", e);
                    return;
                }
            };

            let (clears, events, licensed) = {
                let mut state = self.state.write().await;
                let clears = state.publisher.reset();
                state.project = Some(session);
                state.declarations.clear();
                state.source_cache.invalidate_all();
                let events = state.license.load_cached();
                (clears, events, state.license.is_valid())
            };
            self.engine
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reset();

            for publication in clears {
                self.sink
                    .publish_diagnostics(publication.uri, publication.diagnostics)
                    .await;
            }
            if request.structure_changed {
                self.sink.notify(ServerNotice::ProjectStructureChanged).await;
            }
            if let Some(limit) = request.limit_warning {
                self.sink.notify(ServerNotice::Warning(limit_message(limit))).await;
            }
            self.emit_license_events(events).await;
            licensed
        };

        if licensed {
            self.run_pass(PassMode::Full).await;
        }
    }

    /// `excludeResource`
    pub async fn exclude_resource(&self, params: PathParams) {
        let path = parse_client_path(&params.path);
        let request = {
            let mut state = self.state.write().await;
            match state.project.as_mut() {
                Some(project) => project
                    .exclude(&path)
                    .map_err(|e| log::warn!("Cannot exclude {}: {}", path.display(), e))
                    .ok(),
                None => {
                    log::warn!("excludeResource without an open project");
                    None
                }
            }
        };

        self.sink.notify(ServerNotice::ExclusionsChanged).await;
        if let Some(request) = request {
            self.apply_request(request).await;
        }
    }

    /// `includeResource`
    pub async fn include_resource(&self, params: PathParams) {
        let path = parse_client_path(&params.path);
        let request = {
            let mut state = self.state.write().await;
            match state.project.as_mut() {
                Some(project) => project
                    .include(&path)
                    .map_err(|e| log::warn!("Cannot include {}: {}", path.display(), e))
                    .ok(),
                None => {
                    log::warn!("includeResource without an open project");
                    None
                }
            }
        };

        self.sink.notify(ServerNotice::ExclusionsChanged).await;
        if let Some(request) = request {
            self.apply_request(request).await;
        }
    }

    /// `compiler/addRootUnit`: compile another directory as part of the
    /// project
    pub async fn add_root_unit(&self, params: PathParams) {
        let path = parse_client_path(&params.path);
        self.change_root_units(path, true).await;
    }

    /// `compiler/removeRootUnit`
    pub async fn remove_root_unit(&self, params: PathParams) {
        let path = parse_client_path(&params.path);
        self.change_root_units(path, false).await;
    }

    async fn change_root_units(&self, path: PathBuf, add: bool) {
        let result = {
            let mut state = self.state.write().await;
            match state.project.as_mut() {
                Some(project) if add => project.add_root_unit(&path),
                Some(project) => project.remove_root_unit(&path),
                None => {
                    log::warn!("Root unit change without an open project");
                    return;
                }
            }
        };

        match result {
            Ok(mut request) => {
                request.structure_changed = true;
                self.apply_request(request).await;
                self.run_pass(PassMode::Full).await;
            }
            Err(e) => {
                log::warn!("Cannot change root unit {}: {}", path.display(), e);
                self.sink.notify(ServerNotice::Warning(e.to_string())).await;
            }
        }
    }

    /// `recompile`: full pass over the project
    pub async fn recompile(&self, _params: EmptyParams) {
        self.run_pass(PassMode::Full).await;
    }

    /// `setMacros`: replace the project's macro table. Takes effect on the
    /// next recompile.
    pub async fn set_macros(&self, params: SetMacrosParams) {
        {
            let mut state = self.state.write().await;
            match state.project.as_mut() {
                Some(project) => {
                    project.set_macros(params.macros);
                }
                None => log::warn!("setMacros without an open project"),
            }
        }
        self.sink.notify(ServerNotice::MacrosChanged).await;
    }

    /// `reloadDotFile`: re-read the project dotfile after an external edit
    pub async fn reload_dot_file(&self, _params: EmptyParams) {
        let (request, dirty) = {
            let mut state = self.state.write().await;
            let Some(project) = state.project.as_mut() else {
                log::warn!("reloadDotFile without an open project");
                return;
            };
            let request = project.reload_dotfile();
            (request, project.take_dirty())
        };

        self.apply_request(request).await;
        if !dirty.is_empty() {
            self.run_pass(PassMode::AutoFlush(dirty)).await;
        }
    }

    /// `getDiagnosticStringsForLine`: names of the diagnostics last
    /// published on a line
    pub async fn diagnostic_strings_for_line(
        &self,
        params: DiagnosticStringsParams,
    ) -> Result<DiagnosticStringsResult> {
        let path = parse_client_path(&params.file_path);
        let state = self.state.read().await;
        Ok(DiagnosticStringsResult {
            names: state.publisher.names_on_line(&path, params.line),
        })
    }
}

fn limit_message(limit: usize) -> String {
    format!(
        "Exceeded max files ({}) for project. Consider excluding unneeded files from compilation.",
        limit
    )
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing {}", SERVER_NAME);

        if let Some(config) = params
            .initialization_options
            .as_ref()
            .and_then(parse_server_config)
        {
            let mut state = self.state.write().await;
            if let Some(path) = &config.license_path {
                state
                    .license
                    .set_store(Box::new(FileLicenseStore::new(path.clone())));
            }
            state.config = config;
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        ..Default::default()
                    },
                )),
                completion_provider: Some(CompletionOptions::default()),
                definition_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from(SERVER_NAME),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("{} initialized", SERVER_NAME);
    }

    async fn shutdown(&self) -> Result<()> {
        self.state.read().await.revalidation.cancel_all();
        if crate::perf::is_enabled() {
            crate::perf::pass_metrics()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log_summary();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let Some(path) = uri_to_path(&params.text_document.uri) else {
            log::trace!("Ignoring non-file document {}", params.text_document.uri);
            return;
        };

        self.state.write().await.documents.open(
            path.clone(),
            &params.text_document.text,
            params.text_document.version,
        );
        self.flush_document(path).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(path) = uri_to_path(&params.text_document.uri) else {
            return;
        };
        // Full sync: the last change holds the whole buffer
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };

        {
            let mut state = self.state.write().await;
            if !state.documents.contains(&path) {
                log::warn!("didChange for unopened document {}", path.display());
            }
            state
                .documents
                .update(&path, &change.text, params.text_document.version);
        }
        self.flush_document(path).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let Some(path) = uri_to_path(&params.text_document.uri) else {
            return;
        };

        let structure_changed = {
            let mut state = self.state.write().await;
            state.documents.close(&path);
            state.revalidation.cancel(&path);
            state
                .project
                .as_mut()
                .map_or(false, |project| project.forget_if_missing(&path))
        };

        if structure_changed {
            self.sink.notify(ServerNotice::ProjectStructureChanged).await;
        }
        // The file now compiles from disk, or disappears
        self.run_pass(PassMode::AutoFlush(BTreeSet::from([path]))).await;
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let position = params.text_document_position;
        let Some(path) = uri_to_path(&position.text_document.uri) else {
            return Ok(None);
        };
        let state = self.state.read().await;
        Ok(handlers::completion(&state, &path, position.position))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let Some(path) = uri_to_path(&position.text_document.uri) else {
            return Ok(None);
        };
        let state = self.state.read().await;
        Ok(handlers::goto_definition(&state, &path, position.position))
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let Some(config) = parse_server_config(&params.settings) else {
            return;
        };

        let request = {
            let mut state = self.state.write().await;
            let rescan = state.config.scan_settings_changed(&config);
            if config.license_path != state.config.license_path {
                let path = config
                    .license_path
                    .clone()
                    .unwrap_or_else(default_license_path);
                state.license.set_store(Box::new(FileLicenseStore::new(path)));
            }
            state.config = config;

            let limits = state.scan_limits();
            match state.project.as_mut() {
                Some(project) if rescan => Some(project.rescan(limits)),
                _ => None,
            }
        };

        if let Some(request) = request {
            self.apply_request(request).await;
        }
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(Backend::new)
        .custom_method("setLicenseKey", Backend::set_license_key)
        .custom_method("setProjectPath", Backend::set_project_path)
        .custom_method("excludeResource", Backend::exclude_resource)
        .custom_method("includeResource", Backend::include_resource)
        .custom_method("recompile", Backend::recompile)
        .custom_method("setMacros", Backend::set_macros)
        .custom_method("reloadDotFile", Backend::reload_dot_file)
        .custom_method("compiler/addRootUnit", Backend::add_root_unit)
        .custom_method("compiler/removeRootUnit", Backend::remove_root_unit)
        .custom_method(
            "getDiagnosticStringsForLine",
            Backend::diagnostic_strings_for_line,
        )
        .finish();
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
