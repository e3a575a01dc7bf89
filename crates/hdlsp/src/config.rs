//
// config.rs
//
// Server configuration parsed from initialization options and settings
//

use std::path::PathBuf;

use tower_lsp::lsp_types::DiagnosticSeverity;

/// Default cap on HDL files tracked per project
pub const DEFAULT_MAX_PROJECT_FILES: usize = 10_000;

/// Default cap on directory entries visited while scanning a project
pub const DEFAULT_MAX_SCAN_FILES: usize = 1_000_000;

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Delay before an auto-flush pass runs after a document event, in milliseconds.
    /// Further edits inside the window coalesce into one pass.
    pub debounce_ms: u64,
    /// Maximum number of HDL files tracked for one project
    pub max_project_files: usize,
    /// Maximum number of directory entries visited during discovery
    pub max_scan_files: usize,
    /// Override for the license cache file location
    pub license_path: Option<PathBuf>,
    /// `source` field attached to every published diagnostic
    pub diagnostic_source: String,
    /// Severity for `` `define `` of an already defined macro
    pub macro_redefined_severity: DiagnosticSeverity,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 0,
            max_project_files: DEFAULT_MAX_PROJECT_FILES,
            max_scan_files: DEFAULT_MAX_SCAN_FILES,
            license_path: None,
            diagnostic_source: "hdlsp".to_string(),
            macro_redefined_severity: DiagnosticSeverity::WARNING,
        }
    }
}

impl ServerConfig {
    /// `true` when a change between `self` and `other` affects which files
    /// a project tracks, so the project must be rescanned.
    pub fn scan_settings_changed(&self, other: &ServerConfig) -> bool {
        self.max_project_files != other.max_project_files
            || self.max_scan_files != other.max_scan_files
    }
}

/// Parse a configuration from the client's settings object.
///
/// Accepts either the bare settings object or one nested under an `hdlsp`
/// key (the shape `workspace/didChangeConfiguration` usually carries).
/// Returns `None` when no recognized section is present.
pub fn parse_server_config(settings: &serde_json::Value) -> Option<ServerConfig> {
    let section = match settings.get("hdlsp") {
        Some(nested) if nested.is_object() => nested,
        _ if settings.is_object() => settings,
        _ => return None,
    };

    let mut config = ServerConfig::default();

    if let Some(v) = section.get("debounceMs").and_then(|v| v.as_u64()) {
        config.debounce_ms = v;
    }
    if let Some(v) = section.get("maxProjectFiles").and_then(|v| v.as_u64()) {
        config.max_project_files = v as usize;
    }
    if let Some(v) = section.get("maxScanFiles").and_then(|v| v.as_u64()) {
        config.max_scan_files = v as usize;
    }
    if let Some(v) = section.get("licensePath").and_then(|v| v.as_str()) {
        if !v.is_empty() {
            config.license_path = Some(PathBuf::from(v));
        }
    }
    if let Some(v) = section.get("diagnosticSource").and_then(|v| v.as_str()) {
        config.diagnostic_source = v.to_string();
    }
    if let Some(sev) = section
        .get("macroRedefinedSeverity")
        .and_then(|v| v.as_str())
    {
        config.macro_redefined_severity = parse_severity(sev);
    }

    log::info!("Server configuration:");
    log::info!("  debounce_ms: {}", config.debounce_ms);
    log::info!("  max_project_files: {}", config.max_project_files);
    log::info!("  max_scan_files: {}", config.max_scan_files);
    log::info!("  license_path: {:?}", config.license_path);
    log::info!("  diagnostic_source: {}", config.diagnostic_source);
    log::info!(
        "  macro_redefined_severity: {:?}",
        config.macro_redefined_severity
    );

    Some(config)
}

fn parse_severity(s: &str) -> DiagnosticSeverity {
    match s.to_ascii_lowercase().as_str() {
        "error" => DiagnosticSeverity::ERROR,
        "warning" => DiagnosticSeverity::WARNING,
        "information" | "info" => DiagnosticSeverity::INFORMATION,
        "hint" => DiagnosticSeverity::HINT,
        _ => DiagnosticSeverity::WARNING,
    }
}
