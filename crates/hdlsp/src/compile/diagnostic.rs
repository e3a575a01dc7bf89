//
// compile/diagnostic.rs
//
// Diagnostics produced by the compiler, before conversion to LSP
//

use std::path::PathBuf;

use tower_lsp::lsp_types::{DiagnosticSeverity, Range};

/// Stable diagnostic names. The name is sent as the LSP `code` and is what
/// project suppressions match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticName {
    UnknownDirective,
    UnbalancedConditional,
    IncludeNotFound,
    RecursiveInclude,
    ExpectedMacroName,
    ExpectedIncludeFileName,
    MacroRedefined,
    UnterminatedBlock,
    UnexpectedBlockEnd,
    UnbalancedDelimiter,
    UnterminatedComment,
    UnterminatedString,
    Redefinition,
    UnknownModule,
}

impl DiagnosticName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticName::UnknownDirective => "UnknownDirective",
            DiagnosticName::UnbalancedConditional => "UnbalancedConditional",
            DiagnosticName::IncludeNotFound => "IncludeNotFound",
            DiagnosticName::RecursiveInclude => "RecursiveInclude",
            DiagnosticName::ExpectedMacroName => "ExpectedMacroName",
            DiagnosticName::ExpectedIncludeFileName => "ExpectedIncludeFileName",
            DiagnosticName::MacroRedefined => "MacroRedefined",
            DiagnosticName::UnterminatedBlock => "UnterminatedBlock",
            DiagnosticName::UnexpectedBlockEnd => "UnexpectedBlockEnd",
            DiagnosticName::UnbalancedDelimiter => "UnbalancedDelimiter",
            DiagnosticName::UnterminatedComment => "UnterminatedComment",
            DiagnosticName::UnterminatedString => "UnterminatedString",
            DiagnosticName::Redefinition => "Redefinition",
            DiagnosticName::UnknownModule => "UnknownModule",
        }
    }

    /// Diagnostics that need project-wide analysis and therefore a valid
    /// license
    pub fn is_cross_file(&self) -> bool {
        matches!(self, DiagnosticName::Redefinition | DiagnosticName::UnknownModule)
    }
}

impl std::fmt::Display for DiagnosticName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic located in a specific file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlDiagnostic {
    pub path: PathBuf,
    pub range: Range,
    pub severity: DiagnosticSeverity,
    pub name: DiagnosticName,
    pub message: String,
}

impl HdlDiagnostic {
    pub fn error(path: PathBuf, range: Range, name: DiagnosticName, message: impl Into<String>) -> Self {
        Self {
            path,
            range,
            severity: DiagnosticSeverity::ERROR,
            name,
            message: message.into(),
        }
    }

    pub fn with_severity(mut self, severity: DiagnosticSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sort key giving a stable order within a file
    pub(crate) fn sort_key(&self) -> (u32, u32, DiagnosticName, &str) {
        (
            self.range.start.line,
            self.range.start.character,
            self.name,
            self.message.as_str(),
        )
    }
}
