//
// compile/unit.rs
//
// Single compilation-unit analysis
//
// A unit is one root source file plus everything it pulls in through
// `` `include ``. The analysis runs the preprocessor (macro table,
// conditional compilation, include expansion) and a structural pass over
// the active tokens: block keyword balance, delimiter balance, design unit
// declarations and instantiations. Cross-file checks over the collected
// declarations happen later in the engine.
//

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tower_lsp::lsp_types::{DiagnosticSeverity, Range};

use super::diagnostic::{DiagnosticName, HdlDiagnostic};
use super::lexer::{lex, logical_line_end, Delim, LexErrorKind, Token, TokenKind};
use crate::project::macros::MacroTable;
use crate::utf16::LineIndex;

/// Nesting limit for `` `include ``
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Nesting limit for macro uses inside macro bodies
const MAX_MACRO_DEPTH: usize = 16;

/// Access to file contents and include resolution for one pass
pub trait SourceProvider: Sync {
    /// Current text of `path`: the editor buffer if open, otherwise disk
    fn source(&self, path: &Path) -> Option<Arc<str>>;

    /// Resolve an `` `include `` name written in a file living in `from_dir`
    fn resolve_include(&self, name: &str, from_dir: &Path) -> Option<PathBuf>;

    /// Revision of the editor buffer backing `path`, `None` when the file
    /// is read from disk
    fn revision(&self, path: &Path) -> Option<u64>;
}

#[derive(Debug, Clone)]
pub struct UnitOptions<'a> {
    pub macros: &'a MacroTable,
    pub macro_redefined_severity: DiagnosticSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesignUnitKind {
    Module,
    Interface,
    Package,
    Program,
    Primitive,
    Checker,
}

impl DesignUnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesignUnitKind::Module => "module",
            DesignUnitKind::Interface => "interface",
            DesignUnitKind::Package => "package",
            DesignUnitKind::Program => "program",
            DesignUnitKind::Primitive => "primitive",
            DesignUnitKind::Checker => "checker",
        }
    }

    /// Kinds that can be instantiated by name inside another design unit
    pub fn is_instantiable(&self) -> bool {
        !matches!(self, DesignUnitKind::Package)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub kind: DesignUnitKind,
    pub path: PathBuf,
    pub range: Range,
    /// Header parameters in `#( ... )`, in order
    pub parameters: Vec<Parameter>,
    /// Port names of the header port list, in order
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    /// Default value as written, empty when there is none
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instantiation {
    /// Name of the instantiated module, interface or program
    pub target: String,
    pub path: PathBuf,
    pub range: Range,
}

/// Everything one unit compile produced
#[derive(Debug, Clone, Default)]
pub struct UnitResult {
    pub root: PathBuf,
    pub diagnostics: Vec<HdlDiagnostic>,
    /// Root plus every file pulled in through includes
    pub files_read: BTreeSet<PathBuf>,
    /// Include names that resolved to nothing
    pub missing_includes: BTreeSet<String>,
    pub declarations: Vec<Declaration>,
    pub instantiations: Vec<Instantiation>,
    /// Buffer revision of every file read, `None` for disk content
    pub revisions: HashMap<PathBuf, Option<u64>>,
}

/// Compile the unit rooted at `root`. Never fails: a missing root yields an
/// empty result with nothing read.
pub fn compile_unit(root: &Path, provider: &dyn SourceProvider, options: &UnitOptions<'_>) -> UnitResult {
    let mut compiler = UnitCompiler::new(root, provider, options);
    if let Some(text) = provider.source(root) {
        compiler.note_read(root);
        compiler.process_file(root, &text);
        compiler.finish();
    } else {
        log::debug!("compile_unit: {} is not readable", root.display());
    }
    compiler.result
}

// ============================================================================
// Keyword tables
// ============================================================================

/// Directives that take the rest of the line as arguments
const LINE_DIRECTIVES: &[&str] = &[
    "timescale",
    "default_nettype",
    "line",
    "pragma",
    "begin_keywords",
    "unconnected_drive",
    "default_decay_time",
    "default_trireg_strength",
];

/// Directives without arguments
const BARE_DIRECTIVES: &[&str] = &[
    "celldefine",
    "endcelldefine",
    "resetall",
    "nounconnected_drive",
    "end_keywords",
    "__FILE__",
    "__LINE__",
    "protect",
    "endprotect",
    "delay_mode_distributed",
    "delay_mode_path",
    "delay_mode_unit",
    "delay_mode_zero",
];

/// Built-in gate primitives, instantiated like modules
const GATE_PRIMITIVES: &[&str] = &[
    "and", "nand", "or", "nor", "xor", "xnor", "buf", "not", "bufif0", "bufif1", "notif0",
    "notif1", "pullup", "pulldown", "nmos", "pmos", "rnmos", "rpmos", "cmos", "rcmos", "tran",
    "rtran", "tranif0", "tranif1", "rtranif0", "rtranif1",
];

const KEYWORDS: &[&str] = &[
    "alias", "always", "always_comb", "always_ff", "always_latch", "assert", "assign", "assume",
    "automatic", "before", "begin", "bind", "bins", "binsof", "bit", "break", "byte", "case",
    "casex", "casez", "cell", "chandle", "checker", "class", "clocking", "config", "const",
    "constraint", "context", "continue", "cover", "covergroup", "coverpoint", "cross", "deassign",
    "default", "defparam", "design", "disable", "dist", "do", "edge", "else", "end", "endcase",
    "endchecker", "endclass", "endclocking", "endconfig", "endfunction", "endgenerate",
    "endgroup", "endinterface", "endmodule", "endpackage", "endprimitive", "endprogram",
    "endproperty", "endsequence", "endspecify", "endtable", "endtask", "enum", "event",
    "eventually", "expect", "export", "extends", "extern", "final", "first_match", "for",
    "force", "foreach", "forever", "fork", "forkjoin", "function", "generate", "genvar",
    "global", "highz0", "highz1", "if", "iff", "ifnone", "ignore_bins", "illegal_bins",
    "implements", "implies", "import", "incdir", "include", "initial", "inout", "input",
    "inside", "instance", "int", "integer", "interconnect", "interface", "intersect", "join",
    "join_any", "join_none", "large", "let", "liblist", "library", "local", "localparam",
    "logic", "longint", "macromodule", "matches", "medium", "modport", "module", "nettype",
    "new", "noshowcancelled", "null", "output", "package", "packed", "parameter", "posedge",
    "negedge", "priority", "program", "property", "protected", "pull0", "pull1", "pure",
    "rand", "randc", "randcase", "randsequence", "real", "realtime", "ref", "reg", "release",
    "repeat", "restrict", "return", "scalared", "sequence", "shortint", "shortreal",
    "showcancelled", "signed", "small", "soft", "solve", "specify", "specparam", "static",
    "string", "strong", "strong0", "strong1", "struct", "super", "supply0", "supply1",
    "sync_accept_on", "sync_reject_on", "table", "tagged", "task", "this", "throughout",
    "time", "timeprecision", "timeunit", "tri", "tri0", "tri1", "triand", "trior", "trireg",
    "type", "typedef", "union", "unique", "unique0", "unsigned", "until", "until_with",
    "untyped", "use", "uwire", "var", "vectored", "virtual", "void", "wait", "wait_order",
    "wand", "weak", "weak0", "weak1", "while", "wildcard", "wire", "with", "within", "wor",
    "primitive",
];

/// Directives the preprocessor handles itself rather than as macro uses
fn is_builtin_directive(name: &str) -> bool {
    matches!(
        name,
        "ifdef" | "ifndef" | "elsif" | "else" | "endif" | "define" | "undef" | "undefineall" | "include"
    ) || LINE_DIRECTIVES.contains(&name)
        || BARE_DIRECTIVES.contains(&name)
}

/// Words the structural pass looks back at: item separators and the
/// qualifiers that change what a following keyword means
const CONTEXT_WORDS: &[&str] = &[
    ";", ")", "begin", "end", "generate", "endgenerate", "else", "virtual", "typedef",
    "interface", "wait", "disable", "assert", "assume", "cover", "expect", "restrict", "extern",
];

/// Lookback view of a token. Anything not in `CONTEXT_WORDS` maps to "".
fn context_word(text: &str) -> &'static str {
    CONTEXT_WORDS.iter().find(|w| **w == text).copied().unwrap_or("")
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word) || GATE_PRIMITIVES.contains(&word)
}

/// Block openers and the closers that end them
fn block_closers(opener: &str) -> Option<&'static [&'static str]> {
    Some(match opener {
        "module" | "macromodule" => &["endmodule"],
        "interface" => &["endinterface"],
        "package" => &["endpackage"],
        "program" => &["endprogram"],
        "primitive" => &["endprimitive"],
        "checker" => &["endchecker"],
        "class" => &["endclass"],
        "begin" => &["end"],
        "fork" => &["join", "join_any", "join_none"],
        "case" | "casex" | "casez" | "randcase" => &["endcase"],
        "generate" => &["endgenerate"],
        "covergroup" => &["endgroup"],
        "property" => &["endproperty"],
        "sequence" => &["endsequence"],
        "specify" => &["endspecify"],
        "table" => &["endtable"],
        "config" => &["endconfig"],
        _ => return None,
    })
}

fn is_block_closer(word: &str) -> bool {
    matches!(
        word,
        "endmodule"
            | "endinterface"
            | "endpackage"
            | "endprogram"
            | "endprimitive"
            | "endchecker"
            | "endclass"
            | "end"
            | "join"
            | "join_any"
            | "join_none"
            | "endcase"
            | "endgenerate"
            | "endgroup"
            | "endproperty"
            | "endsequence"
            | "endspecify"
            | "endtable"
            | "endconfig"
    )
}

fn design_unit_kind(opener: &str) -> Option<DesignUnitKind> {
    match opener {
        "module" | "macromodule" => Some(DesignUnitKind::Module),
        "interface" => Some(DesignUnitKind::Interface),
        "package" => Some(DesignUnitKind::Package),
        "program" => Some(DesignUnitKind::Program),
        "primitive" => Some(DesignUnitKind::Primitive),
        "checker" => Some(DesignUnitKind::Checker),
        _ => None,
    }
}

/// Tokens after which a word starts a new statement or item
fn starts_item_after(prev: Option<&str>) -> bool {
    match prev {
        None => true,
        Some(p) => matches!(p, ";" | ")" | "begin" | "end" | "generate" | "endgenerate" | "else"),
    }
}

// ============================================================================
// Compiler
// ============================================================================

#[derive(Debug, Clone)]
struct OpenBlock {
    opener: &'static str,
    closers: &'static [&'static str],
    design_unit: Option<DesignUnitKind>,
    path: PathBuf,
    range: Range,
}

#[derive(Debug, Clone)]
struct OpenDelim {
    delim: Delim,
    path: PathBuf,
    range: Range,
}

#[derive(Debug, Clone)]
struct CondFrame {
    parent_active: bool,
    active: bool,
    taken: bool,
    seen_else: bool,
    range: Range,
}

#[derive(Debug, Clone)]
struct MacroDef {
    body: String,
    /// Takes arguments; only object-like macros are expanded
    function_like: bool,
    from_project: bool,
}

/// The two tokens before the current one, as context words
#[derive(Debug, Clone, Copy, Default)]
struct Walk {
    prev: Option<&'static str>,
    before_prev: Option<&'static str>,
}

struct UnitCompiler<'p> {
    provider: &'p dyn SourceProvider,
    options: &'p UnitOptions<'p>,
    macros: HashMap<String, MacroDef>,
    include_stack: Vec<PathBuf>,
    blocks: Vec<OpenBlock>,
    delims: Vec<OpenDelim>,
    result: UnitResult,
}

/// Per-file view used while walking tokens
struct FileCtx<'t> {
    path: &'t Path,
    text: &'t str,
    index: LineIndex,
}

impl FileCtx<'_> {
    fn range(&self, start: usize, end: usize) -> Range {
        Range::new(
            self.index.position(self.text, start),
            self.index.position(self.text, end),
        )
    }
}

impl<'p> UnitCompiler<'p> {
    fn new(root: &Path, provider: &'p dyn SourceProvider, options: &'p UnitOptions<'p>) -> Self {
        let macros = options
            .macros
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    MacroDef {
                        body: value.to_string(),
                        function_like: false,
                        from_project: true,
                    },
                )
            })
            .collect();
        Self {
            provider,
            options,
            macros,
            include_stack: Vec::new(),
            blocks: Vec::new(),
            delims: Vec::new(),
            result: UnitResult {
                root: root.to_path_buf(),
                ..Default::default()
            },
        }
    }

    fn note_read(&mut self, path: &Path) {
        self.result.files_read.insert(path.to_path_buf());
        self.result
            .revisions
            .insert(path.to_path_buf(), self.provider.revision(path));
    }

    fn error(&mut self, path: &Path, range: Range, name: DiagnosticName, message: String) {
        self.result
            .diagnostics
            .push(HdlDiagnostic::error(path.to_path_buf(), range, name, message));
    }

    fn process_file(&mut self, path: &Path, text: &str) {
        self.include_stack.push(path.to_path_buf());
        let ctx = FileCtx {
            path,
            text,
            index: LineIndex::new(text),
        };
        let lexed = lex(text);

        for err in &lexed.errors {
            let (name, message) = match err.kind {
                LexErrorKind::UnterminatedComment => {
                    (DiagnosticName::UnterminatedComment, "unterminated block comment")
                }
                LexErrorKind::UnterminatedString => {
                    (DiagnosticName::UnterminatedString, "unterminated string literal")
                }
            };
            let range = ctx.range(err.start, err.end);
            self.error(path, range, name, message.to_string());
        }

        let tokens = &lexed.tokens;
        let mut conds: Vec<CondFrame> = Vec::new();
        let mut walk = Walk::default();
        let mut i = 0;

        while i < tokens.len() {
            let tok = tokens[i];
            let active = conds.last().map_or(true, |c| c.active);

            if tok.kind == TokenKind::Directive {
                if active && self.is_object_macro(tok.text) {
                    self.expand_macro(&ctx, tok, tok.text, 0, &mut walk);
                    i += 1;
                } else {
                    i = self.directive(&ctx, tokens, i, &mut conds, active);
                }
                continue;
            }

            if active {
                self.structural(&ctx, tokens, i, &mut walk);
            }
            i += 1;
        }

        for frame in conds {
            self.error(
                path,
                frame.range,
                DiagnosticName::UnbalancedConditional,
                "missing `endif".to_string(),
            );
        }
        self.include_stack.pop();
    }

    /// Feed one active token to the block and delimiter checks
    fn structural(&mut self, ctx: &FileCtx<'_>, tokens: &[Token<'_>], i: usize, walk: &mut Walk) {
        let tok = tokens[i];
        match tok.kind {
            TokenKind::Identifier => self.word(ctx, tokens, i, walk.prev, walk.before_prev),
            TokenKind::Open(delim) => self.delims.push(OpenDelim {
                delim,
                path: ctx.path.to_path_buf(),
                range: ctx.range(tok.start, tok.end),
            }),
            TokenKind::Close(delim) => self.close_delim(ctx, tok, delim),
            _ => {}
        }
        walk.before_prev = walk.prev;
        walk.prev = Some(context_word(tok.text));
    }

    fn is_object_macro(&self, name: &str) -> bool {
        !is_builtin_directive(name)
            && self.macros.get(name).map_or(false, |m| !m.function_like)
    }

    /// Walk the body of the object-like macro `name` as if its tokens stood
    /// at `site`. Diagnostics inside the body point at the use.
    fn expand_macro(&mut self, ctx: &FileCtx<'_>, site: Token<'_>, name: &str, depth: usize, walk: &mut Walk) {
        if depth >= MAX_MACRO_DEPTH {
            log::debug!("Expansion of `{} nested deeper than {}", name, MAX_MACRO_DEPTH);
            return;
        }
        let Some(body) = self.macros.get(name).map(|m| m.body.clone()) else {
            return;
        };
        let tokens: Vec<Token<'_>> = lex(&body)
            .tokens
            .into_iter()
            .map(|t| Token {
                start: site.start,
                end: site.end,
                ..t
            })
            .collect();

        for j in 0..tokens.len() {
            let tok = tokens[j];
            if tok.kind != TokenKind::Directive {
                self.structural(ctx, &tokens, j, walk);
            } else if self.is_object_macro(tok.text) {
                self.expand_macro(ctx, site, tok.text, depth + 1, walk);
            } else if !self.macros.contains_key(tok.text) && !is_builtin_directive(tok.text) {
                self.error(
                    ctx.path,
                    ctx.range(site.start, site.end),
                    DiagnosticName::UnknownDirective,
                    format!("unknown macro '`{}' in the expansion of '`{}'", tok.text, name),
                );
            }
        }
    }

    fn finish(&mut self) {
        for block in std::mem::take(&mut self.blocks) {
            let message = format!("missing '{}' for '{}'", block.closers[0], block.opener);
            self.error(&block.path, block.range, DiagnosticName::UnterminatedBlock, message);
        }
        for open in std::mem::take(&mut self.delims) {
            let message = format!("unclosed '{}'", open.delim.open_char());
            self.error(&open.path, open.range, DiagnosticName::UnbalancedDelimiter, message);
        }
    }

    /// Name operand of a conditional or `` `define `` / `` `undef ``: the next
    /// identifier on the same logical line.
    fn operand<'t>(ctx: &FileCtx<'_>, tokens: &[Token<'t>], i: usize) -> Option<Token<'t>> {
        let line_end = logical_line_end(ctx.text, tokens[i].end);
        tokens
            .get(i + 1)
            .filter(|t| t.start < line_end && t.kind == TokenKind::Identifier)
            .copied()
    }

    /// Index of the first token at or past the end of the logical line
    /// holding `tokens[i]`
    fn skip_line(ctx: &FileCtx<'_>, tokens: &[Token<'_>], i: usize) -> usize {
        let line_end = logical_line_end(ctx.text, tokens[i].end);
        let mut j = i + 1;
        while j < tokens.len() && tokens[j].start < line_end {
            j += 1;
        }
        j
    }

    /// Handle the directive at `tokens[i]`; returns the next token index.
    fn directive(
        &mut self,
        ctx: &FileCtx<'_>,
        tokens: &[Token<'_>],
        i: usize,
        conds: &mut Vec<CondFrame>,
        active: bool,
    ) -> usize {
        let tok = tokens[i];
        let range = ctx.range(tok.start, tok.end);

        match tok.text {
            "ifdef" | "ifndef" => {
                let operand = Self::operand(ctx, tokens, i);
                let defined = operand.map_or(false, |t| self.macros.contains_key(t.text));
                let cond = if tok.text == "ifdef" { defined } else { !defined };
                if operand.is_none() && active {
                    self.error(
                        ctx.path,
                        range,
                        DiagnosticName::ExpectedMacroName,
                        format!("expected macro name after `{}", tok.text),
                    );
                }
                conds.push(CondFrame {
                    parent_active: active,
                    active: active && cond,
                    taken: cond,
                    seen_else: false,
                    range,
                });
                return if operand.is_some() { i + 2 } else { i + 1 };
            }
            "elsif" => {
                let operand = Self::operand(ctx, tokens, i);
                let defined = operand.map_or(false, |t| self.macros.contains_key(t.text));
                match conds.last_mut() {
                    Some(frame) if !frame.seen_else => {
                        frame.active = frame.parent_active && !frame.taken && defined;
                        frame.taken |= defined;
                    }
                    Some(frame) => {
                        frame.active = false;
                        self.error(
                            ctx.path,
                            range,
                            DiagnosticName::UnbalancedConditional,
                            "`elsif after `else".to_string(),
                        );
                    }
                    None => self.error(
                        ctx.path,
                        range,
                        DiagnosticName::UnbalancedConditional,
                        "`elsif without matching `ifdef".to_string(),
                    ),
                }
                return if operand.is_some() { i + 2 } else { i + 1 };
            }
            "else" => {
                match conds.last_mut() {
                    Some(frame) if !frame.seen_else => {
                        frame.active = frame.parent_active && !frame.taken;
                        frame.taken = true;
                        frame.seen_else = true;
                    }
                    Some(frame) => {
                        frame.active = false;
                        self.error(
                            ctx.path,
                            range,
                            DiagnosticName::UnbalancedConditional,
                            "duplicate `else".to_string(),
                        );
                    }
                    None => self.error(
                        ctx.path,
                        range,
                        DiagnosticName::UnbalancedConditional,
                        "`else without matching `ifdef".to_string(),
                    ),
                }
                return i + 1;
            }
            "endif" => {
                if conds.pop().is_none() {
                    self.error(
                        ctx.path,
                        range,
                        DiagnosticName::UnbalancedConditional,
                        "`endif without matching `ifdef".to_string(),
                    );
                }
                return i + 1;
            }
            _ => {}
        }

        if !active {
            return i + 1;
        }

        match tok.text {
            "define" => self.define(ctx, tokens, i, range),
            "undef" => {
                match Self::operand(ctx, tokens, i) {
                    Some(name) => {
                        self.macros.remove(name.text);
                    }
                    None => self.error(
                        ctx.path,
                        range,
                        DiagnosticName::ExpectedMacroName,
                        "expected macro name after `undef".to_string(),
                    ),
                }
                Self::skip_line(ctx, tokens, i)
            }
            "undefineall" => {
                self.macros.clear();
                i + 1
            }
            "include" => {
                self.include(ctx, tokens, i, range);
                Self::skip_line(ctx, tokens, i)
            }
            name if LINE_DIRECTIVES.contains(&name) => Self::skip_line(ctx, tokens, i),
            name if BARE_DIRECTIVES.contains(&name) => i + 1,
            name => {
                if !self.macros.contains_key(name) {
                    self.error(
                        ctx.path,
                        range,
                        DiagnosticName::UnknownDirective,
                        format!("unknown macro or compiler directive '`{}'", name),
                    );
                }
                i + 1
            }
        }
    }

    fn define(&mut self, ctx: &FileCtx<'_>, tokens: &[Token<'_>], i: usize, range: Range) -> usize {
        let next = Self::skip_line(ctx, tokens, i);
        let Some(name) = Self::operand(ctx, tokens, i) else {
            self.error(
                ctx.path,
                range,
                DiagnosticName::ExpectedMacroName,
                "expected macro name after `define".to_string(),
            );
            return next;
        };

        let line_end = logical_line_end(ctx.text, tokens[i].end);
        let body = normalize_body(&ctx.text[name.end..line_end]);
        let function_like = ctx.text[name.end..].starts_with('(');

        if let Some(existing) = self.macros.get(name.text) {
            if !existing.from_project && existing.body != body {
                let diag = HdlDiagnostic::error(
                    ctx.path.to_path_buf(),
                    ctx.range(name.start, name.end),
                    DiagnosticName::MacroRedefined,
                    format!("macro '{}' redefined", name.text),
                )
                .with_severity(self.options.macro_redefined_severity);
                self.result.diagnostics.push(diag);
            }
        }
        self.macros.insert(
            name.text.to_string(),
            MacroDef {
                body,
                function_like,
                from_project: false,
            },
        );
        next
    }

    fn include(&mut self, ctx: &FileCtx<'_>, tokens: &[Token<'_>], i: usize, range: Range) {
        let line_end = logical_line_end(ctx.text, tokens[i].end);
        let target = tokens.get(i + 1).filter(|t| t.start < line_end);

        let (name, name_range) = match target {
            Some(t) if t.kind == TokenKind::Str && !t.text.is_empty() => {
                (t.text.to_string(), ctx.range(t.start, t.end))
            }
            Some(t) if t.text == "<" => {
                // `include <file>
                let close = ctx.text[t.end..line_end].find('>').map(|p| t.end + p);
                match close {
                    Some(end) if end > t.end => {
                        (ctx.text[t.end..end].trim().to_string(), ctx.range(t.start, end + 1))
                    }
                    _ => {
                        self.error(
                            ctx.path,
                            range,
                            DiagnosticName::ExpectedIncludeFileName,
                            "expected include file name".to_string(),
                        );
                        return;
                    }
                }
            }
            _ => {
                self.error(
                    ctx.path,
                    range,
                    DiagnosticName::ExpectedIncludeFileName,
                    "expected include file name".to_string(),
                );
                return;
            }
        };

        let from_dir = ctx.path.parent().unwrap_or_else(|| Path::new(""));
        let Some(resolved) = self.provider.resolve_include(&name, from_dir) else {
            self.result.missing_includes.insert(name.clone());
            self.error(
                ctx.path,
                name_range,
                DiagnosticName::IncludeNotFound,
                format!("could not find include file '{}'", name),
            );
            return;
        };

        if self.include_stack.contains(&resolved) {
            self.error(
                ctx.path,
                name_range,
                DiagnosticName::RecursiveInclude,
                format!("'{}' includes itself", name),
            );
            return;
        }
        if self.include_stack.len() >= MAX_INCLUDE_DEPTH {
            self.error(
                ctx.path,
                name_range,
                DiagnosticName::RecursiveInclude,
                format!("include depth exceeds {}", MAX_INCLUDE_DEPTH),
            );
            return;
        }

        match self.provider.source(&resolved) {
            Some(text) => {
                self.note_read(&resolved);
                self.process_file(&resolved, &text);
            }
            None => {
                self.result.missing_includes.insert(name.clone());
                self.error(
                    ctx.path,
                    name_range,
                    DiagnosticName::IncludeNotFound,
                    format!("could not read include file '{}'", name),
                );
            }
        }
    }

    fn close_delim(&mut self, ctx: &FileCtx<'_>, tok: Token<'_>, delim: Delim) {
        let range = ctx.range(tok.start, tok.end);
        match self.delims.last() {
            Some(open) if open.delim == delim => {
                self.delims.pop();
            }
            Some(open) => {
                let expected = open.delim.close_char();
                self.error(
                    ctx.path,
                    range,
                    DiagnosticName::UnbalancedDelimiter,
                    format!("expected '{}' but found '{}'", expected, delim.close_char()),
                );
                // Resynchronize on a matching opener further down, if any
                if let Some(pos) = self.delims.iter().rposition(|d| d.delim == delim) {
                    self.delims.truncate(pos);
                }
            }
            None => self.error(
                ctx.path,
                range,
                DiagnosticName::UnbalancedDelimiter,
                format!("unexpected '{}'", delim.close_char()),
            ),
        }
    }

    fn word(
        &mut self,
        ctx: &FileCtx<'_>,
        tokens: &[Token<'_>],
        i: usize,
        prev: Option<&str>,
        before_prev: Option<&str>,
    ) {
        let tok = tokens[i];
        let word = tok.text;

        if is_block_closer(word) {
            self.close_block(ctx, tok);
            return;
        }

        if let Some(closers) = block_closers(word) {
            if self.opens_block(word, tokens, i, prev, before_prev) {
                let opener = static_opener(word);
                let design_unit = design_unit_kind(word);
                if let Some(kind) = design_unit {
                    if !self.blocks.iter().any(|b| b.design_unit.is_some()) {
                        self.declare(ctx, tokens, i, kind);
                    }
                }
                self.blocks.push(OpenBlock {
                    opener,
                    closers,
                    design_unit,
                    path: ctx.path.to_path_buf(),
                    range: ctx.range(tok.start, tok.end),
                });
            }
            return;
        }

        if !is_keyword(word) && starts_item_after(prev) && self.in_instantiating_scope() {
            if let Some(instance) = instantiation_at(tokens, i) {
                self.result.instantiations.push(Instantiation {
                    target: word.to_string(),
                    path: ctx.path.to_path_buf(),
                    range: ctx.range(tok.start, tok.end),
                });
                log::trace!("instantiation of {} as {}", word, instance);
            }
        }
    }

    /// Keywords that only open a block in some positions
    fn opens_block(
        &self,
        word: &str,
        tokens: &[Token<'_>],
        i: usize,
        prev: Option<&str>,
        before_prev: Option<&str>,
    ) -> bool {
        let next = tokens.get(i + 1).map(|t| t.text);
        match word {
            // `virtual interface foo vif;` and `interface class`
            "interface" => prev != Some("virtual") && next != Some("class"),
            // forward declaration
            "class" => prev != Some("typedef") && !(prev == Some("interface") && before_prev == Some("typedef")),
            "fork" => !matches!(prev, Some("wait") | Some("disable")),
            "property" | "sequence" => {
                !matches!(prev, Some("assert") | Some("assume") | Some("cover") | Some("expect") | Some("restrict"))
            }
            // `extern module` prototypes have no body
            "module" | "macromodule" | "program" | "primitive" => prev != Some("extern"),
            _ => true,
        }
    }

    fn in_instantiating_scope(&self) -> bool {
        let innermost = self.blocks.iter().rev().find(|b| {
            !matches!(b.opener, "begin" | "fork" | "case" | "casex" | "casez" | "randcase" | "generate")
        });
        matches!(
            innermost.and_then(|b| b.design_unit),
            Some(DesignUnitKind::Module) | Some(DesignUnitKind::Interface) | Some(DesignUnitKind::Program)
        )
    }

    fn declare(&mut self, ctx: &FileCtx<'_>, tokens: &[Token<'_>], i: usize, kind: DesignUnitKind) {
        let name = tokens[i + 1..]
            .iter()
            .enumerate()
            .take(3)
            .find(|(_, t)| t.kind == TokenKind::Identifier && !matches!(t.text, "automatic" | "static"));
        if let Some((offset, name)) = name {
            if !is_keyword(name.text) {
                self.result.declarations.push(Declaration {
                    name: name.text.to_string(),
                    kind,
                    path: ctx.path.to_path_buf(),
                    range: ctx.range(name.start, name.end),
                    parameters: header_parameters(&tokens[i + offset + 2..]),
                    ports: header_ports(&tokens[i + offset + 2..]),
                });
            }
        }
    }

    fn close_block(&mut self, ctx: &FileCtx<'_>, tok: Token<'_>) {
        let closer = tok.text;
        match self.blocks.iter().rposition(|b| b.closers.contains(&closer)) {
            Some(pos) => {
                let skipped: Vec<OpenBlock> = self.blocks.drain(pos + 1..).collect();
                for block in skipped {
                    let message = format!("missing '{}' for '{}'", block.closers[0], block.opener);
                    self.error(&block.path, block.range, DiagnosticName::UnterminatedBlock, message);
                }
                self.blocks.pop();
            }
            None => {
                let range = ctx.range(tok.start, tok.end);
                self.error(
                    ctx.path,
                    range,
                    DiagnosticName::UnexpectedBlockEnd,
                    format!("'{}' without a matching block", closer),
                );
            }
        }
    }
}

fn static_opener(word: &str) -> &'static str {
    match word {
        "module" => "module",
        "macromodule" => "macromodule",
        "interface" => "interface",
        "package" => "package",
        "program" => "program",
        "primitive" => "primitive",
        "checker" => "checker",
        "class" => "class",
        "begin" => "begin",
        "fork" => "fork",
        "case" => "case",
        "casex" => "casex",
        "casez" => "casez",
        "randcase" => "randcase",
        "generate" => "generate",
        "covergroup" => "covergroup",
        "property" => "property",
        "sequence" => "sequence",
        "specify" => "specify",
        "table" => "table",
        _ => "config",
    }
}

/// Collapse whitespace and line continuations so equivalent bodies compare
/// equal
fn normalize_body(raw: &str) -> String {
    raw.replace("\\\r\n", " ")
        .replace("\\\n", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Skip a balanced delimiter group starting at `tokens[i]` (an opener).
/// Returns the index just past the matching closer.
fn skip_group(tokens: &[Token<'_>], i: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, t) in tokens.iter().enumerate().skip(i) {
        match t.kind {
            TokenKind::Open(_) => depth += 1,
            TokenKind::Close(_) => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(j + 1);
                }
            }
            TokenKind::Other if t.text == ";" => return None,
            _ => {}
        }
    }
    None
}

/// Parameters of a `#( ... )` header starting at `tokens[0]`. Defaults
/// are rebuilt from their tokens without whitespace.
fn header_parameters(tokens: &[Token<'_>]) -> Vec<Parameter> {
    let mut params = Vec::new();
    let opens_header = tokens.first().map_or(false, |t| t.text == "#")
        && tokens.get(1).map_or(false, |t| t.kind == TokenKind::Open(Delim::Paren));
    if !opens_header {
        return params;
    }

    let mut depth = 0usize;
    let mut name: Option<&str> = None;
    let mut default: Option<String> = None;
    for t in &tokens[2..] {
        let top = depth == 0;
        match t.kind {
            TokenKind::Close(_) if top => break,
            TokenKind::Other if top && t.text == ";" => break,
            TokenKind::Other if top && t.text == "," => {
                push_parameter(&mut params, name.take(), default.take());
                continue;
            }
            TokenKind::Other if top && t.text == "=" && default.is_none() => {
                default = Some(String::new());
                continue;
            }
            TokenKind::Open(_) => depth += 1,
            TokenKind::Close(_) => depth -= 1,
            _ => {}
        }
        match default.as_mut() {
            Some(value) if t.kind == TokenKind::Str => {
                value.push('"');
                value.push_str(t.text);
                value.push('"');
            }
            Some(value) => value.push_str(t.text),
            None if t.kind == TokenKind::Identifier && !is_keyword(t.text) => name = Some(t.text),
            None => {}
        }
    }
    push_parameter(&mut params, name, default);
    params
}

/// Names of the port list that follows a design unit name and its optional
/// parameter header: the last identifier of each top-level item
fn header_ports(tokens: &[Token<'_>]) -> Vec<String> {
    let mut j = 0;
    if tokens.first().map_or(false, |t| t.text == "#") {
        match skip_group(tokens, 1) {
            Some(next) => j = next,
            None => return Vec::new(),
        }
    }
    if tokens.get(j).map_or(true, |t| t.kind != TokenKind::Open(Delim::Paren)) {
        return Vec::new();
    }

    let mut ports = Vec::new();
    let mut depth = 0usize;
    let mut last: Option<&str> = None;
    for t in &tokens[j + 1..] {
        match t.kind {
            TokenKind::Close(_) if depth == 0 => break,
            TokenKind::Open(_) => depth += 1,
            TokenKind::Close(_) => depth -= 1,
            TokenKind::Other if depth == 0 && t.text == ";" => break,
            TokenKind::Other if depth == 0 && t.text == "," => ports.extend(last.take().map(str::to_string)),
            TokenKind::Identifier if depth == 0 && !is_keyword(t.text) => last = Some(t.text),
            _ => {}
        }
    }
    ports.extend(last.map(str::to_string));
    ports
}

fn push_parameter(params: &mut Vec<Parameter>, name: Option<&str>, default: Option<String>) {
    if let Some(name) = name {
        params.push(Parameter {
            name: name.to_string(),
            default: default.unwrap_or_default(),
        });
    }
}

/// Recognize `target [#(params) | #delay] instance [dims] (` starting at
/// the target word. Returns the instance name.
fn instantiation_at<'t>(tokens: &[Token<'t>], i: usize) -> Option<&'t str> {
    let mut j = i + 1;
    if tokens.get(j)?.text == "#" {
        j += 1;
        match tokens.get(j)?.kind {
            TokenKind::Open(Delim::Paren) => j = skip_group(tokens, j)?,
            _ => j += 1,
        }
    }
    let instance = tokens.get(j)?;
    if instance.kind != TokenKind::Identifier || is_keyword(instance.text) {
        return None;
    }
    j += 1;
    while let Some(t) = tokens.get(j) {
        if t.kind == TokenKind::Open(Delim::Bracket) {
            j = skip_group(tokens, j)?;
        } else {
            break;
        }
    }
    (tokens.get(j)?.kind == TokenKind::Open(Delim::Paren)).then_some(instance.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory project for unit compiles
    #[derive(Default)]
    struct Files {
        files: HashMap<PathBuf, Arc<str>>,
    }

    impl Files {
        fn with(mut self, name: &str, text: &str) -> Self {
            self.files.insert(p(name), Arc::from(text));
            self
        }
    }

    impl SourceProvider for Files {
        fn source(&self, path: &Path) -> Option<Arc<str>> {
            self.files.get(path).cloned()
        }

        fn resolve_include(&self, name: &str, from_dir: &Path) -> Option<PathBuf> {
            let candidate = from_dir.join(name);
            self.files.contains_key(&candidate).then_some(candidate)
        }

        fn revision(&self, _path: &Path) -> Option<u64> {
            None
        }
    }

    fn p(name: &str) -> PathBuf {
        PathBuf::from(format!("/project/{}", name))
    }

    fn compile_with(files: &Files, root: &str, macros: &MacroTable) -> UnitResult {
        let options = UnitOptions {
            macros,
            macro_redefined_severity: DiagnosticSeverity::WARNING,
        };
        compile_unit(&p(root), files, &options)
    }

    fn compile(files: &Files, root: &str) -> UnitResult {
        compile_with(files, root, &MacroTable::new())
    }

    fn names(result: &UnitResult) -> Vec<DiagnosticName> {
        result.diagnostics.iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_clean_module() {
        let files = Files::default().with(
            "top.sv",
            "module top(input logic clk, output logic [3:0] q);\n\
             always_ff @(posedge clk) begin\n  q <= q + 1;\nend\nendmodule\n",
        );
        let result = compile(&files, "top.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert_eq!(result.declarations.len(), 1);
        assert_eq!(result.declarations[0].name, "top");
        assert_eq!(result.declarations[0].kind, DesignUnitKind::Module);
    }

    #[test]
    fn test_missing_endmodule() {
        let files = Files::default().with("bad.sv", "module bad;\n  logic a;\n");
        let result = compile(&files, "bad.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnterminatedBlock]);
        assert_eq!(result.diagnostics[0].range.start.line, 0);
    }

    #[test]
    fn test_unexpected_end() {
        let files = Files::default().with("bad.sv", "module m; end endmodule");
        let result = compile(&files, "bad.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnexpectedBlockEnd]);
    }

    #[test]
    fn test_missing_end_inside_module_reported_once() {
        let files = Files::default().with("bad.sv", "module m;\ninitial begin\nendmodule\n");
        let result = compile(&files, "bad.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnterminatedBlock]);
        assert_eq!(result.diagnostics[0].range.start.line, 1);
        assert!(result.diagnostics[0].message.contains("'end'"));
    }

    #[test]
    fn test_unbalanced_delimiters() {
        let files = Files::default().with("bad.sv", "module m(input a;\nendmodule\n");
        let result = compile(&files, "bad.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnbalancedDelimiter]);

        let files = Files::default().with("bad.sv", "module m; assign a = b]; endmodule");
        let result = compile(&files, "bad.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnbalancedDelimiter]);
    }

    #[test]
    fn test_unknown_macro_usage() {
        let files = Files::default().with("m.sv", "module m; localparam int W = `WIDTH; endmodule");
        let result = compile(&files, "m.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnknownDirective]);
        assert!(result.diagnostics[0].message.contains("`WIDTH"));
    }

    #[test]
    fn test_project_macro_satisfies_usage() {
        let files = Files::default().with("m.sv", "module m; localparam int W = `WIDTH; endmodule");
        let macros = MacroTable::from_macros(vec![crate::project::macros::Macro::new("WIDTH", "8")]);
        let result = compile_with(&files, "m.sv", &macros);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_macro_body_joins_structure() {
        let text = "`define END_MOD endmodule\nmodule m;\n`END_MOD\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert_eq!(result.declarations[0].name, "m");
    }

    #[test]
    fn test_nested_macro_bodies_expand() {
        let text = "`define CLOSE end\n`define DONE `CLOSE endmodule\nmodule m;\ninitial begin\n`DONE\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn test_macro_body_errors_point_at_use() {
        let text = "`define OPEN begin\nmodule m;\ninitial\n  `OPEN\nendmodule\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnterminatedBlock]);
        assert_eq!(result.diagnostics[0].range.start.line, 3);
    }

    #[test]
    fn test_self_referencing_macro_stops() {
        let text = "`define LOOP `LOOP\nmodule m; `LOOP endmodule\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn test_function_like_macro_not_expanded() {
        let text = "`define MAX(a, b) ((a) > (b) ? (a) : (b))\nmodule m; localparam X = `MAX(1, 2); endmodule\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn test_ifdef_guards_error() {
        let text = "`ifdef FOO\nmodule m; endmodule\n`else\nmodule m;\n`endif\n";
        let files = Files::default().with("m.sv", text);

        let without = compile(&files, "m.sv");
        assert_eq!(names(&without), vec![DiagnosticName::UnterminatedBlock]);

        let macros = MacroTable::from_macros(vec![crate::project::macros::Macro::new("FOO", "1")]);
        let with = compile_with(&files, "m.sv", &macros);
        assert!(with.diagnostics.is_empty());
    }

    #[test]
    fn test_ifndef_and_elsif() {
        let text = "`define B\n`ifndef B\n`X1\n`elsif B\nmodule ok; endmodule\n`else\n`X2\n`endif\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn test_nested_inactive_region_ignores_inner_branches() {
        let text = "`ifdef NOPE\n`ifdef ALSO_NOPE\n`else\n`BAD\n`endif\n`endif\n";
        let files = Files::default().with("m.sv", text);
        assert!(compile(&files, "m.sv").diagnostics.is_empty());
    }

    #[test]
    fn test_unbalanced_conditionals() {
        let files = Files::default().with("m.sv", "`endif\n`ifdef A\n");
        let result = compile(&files, "m.sv");
        assert_eq!(
            names(&result),
            vec![
                DiagnosticName::UnbalancedConditional,
                DiagnosticName::UnbalancedConditional
            ]
        );
    }

    #[test]
    fn test_define_then_use_and_undef() {
        let text = "`define W 4\nlogic [`W-1:0] a;\n`undef W\nlogic [`W-1:0] b;\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert_eq!(names(&result), vec![DiagnosticName::UnknownDirective]);
        assert_eq!(result.diagnostics[0].range.start.line, 3);
    }

    #[test]
    fn test_multiline_define_body_is_skipped() {
        let text = "`define BLOCK begin \\\n  x = 1; \\\nend\nmodule m; endmodule\n";
        let files = Files::default().with("m.sv", text);
        assert!(compile(&files, "m.sv").diagnostics.is_empty());
    }

    #[test]
    fn test_macro_redefinition_warns() {
        let text = "`define A 1\n`define A 2\n`define A 2\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert_eq!(names(&result), vec![DiagnosticName::MacroRedefined]);
        assert_eq!(result.diagnostics[0].severity, DiagnosticSeverity::WARNING);
    }

    #[test]
    fn test_include_expands_and_reports_in_header() {
        let files = Files::default()
            .with("defs.svh", "`define FOO 3\nmodule h;\n")
            .with("top.sv", "`include \"defs.svh\"\nendmodule\nlocalparam X = `FOO;\n");
        let result = compile(&files, "top.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!(result.files_read.contains(&p("defs.svh")));
        assert!(result.files_read.contains(&p("top.sv")));
    }

    #[test]
    fn test_missing_include() {
        let files = Files::default().with(
            "top.sv",
            "`include \"definitions.svh\"\nmodule top; localparam X = `FOO; endmodule\n",
        );
        let result = compile(&files, "top.sv");
        assert_eq!(
            names(&result),
            vec![DiagnosticName::IncludeNotFound, DiagnosticName::UnknownDirective]
        );
        assert!(result.missing_includes.contains("definitions.svh"));
    }

    #[test]
    fn test_recursive_include() {
        let files = Files::default()
            .with("a.svh", "`include \"b.svh\"\n")
            .with("b.svh", "`include \"a.svh\"\n")
            .with("top.sv", "`include \"a.svh\"\n");
        let result = compile(&files, "top.sv");
        assert_eq!(names(&result), vec![DiagnosticName::RecursiveInclude]);
        assert_eq!(result.diagnostics[0].path, p("b.svh"));
    }

    #[test]
    fn test_unterminated_comment_and_string() {
        let files = Files::default().with("m.sv", "string s = \"oops\n/* dangling");
        let result = compile(&files, "m.sv");
        let mut found = names(&result);
        found.sort();
        assert_eq!(
            found,
            vec![DiagnosticName::UnterminatedComment, DiagnosticName::UnterminatedString]
        );
    }

    #[test]
    fn test_builtin_directives_accepted() {
        let text = "`timescale 1ns/1ps\n`default_nettype none\n`resetall\nmodule m; endmodule\n";
        let files = Files::default().with("m.sv", text);
        assert!(compile(&files, "m.sv").diagnostics.is_empty());
    }

    #[test]
    fn test_instantiations_recorded() {
        let text = "module top;\n\
                    sub u_sub(.a(a));\n\
                    fifo #(.DEPTH(4)) u_fifo [1:0] (.clk(clk));\n\
                    and g1(o, a, b);\n\
                    logic [3:0] data;\n\
                    my_t value;\n\
                    endmodule\n";
        let files = Files::default().with("top.sv", text);
        let result = compile(&files, "top.sv");
        let targets: Vec<&str> = result.instantiations.iter().map(|i| i.target.as_str()).collect();
        assert_eq!(targets, vec!["sub", "fifo"]);
    }

    #[test]
    fn test_no_instantiations_in_classes_or_packages() {
        let text = "package p;\nclass c;\nfoo bar(1);\nendclass\nendpackage\n";
        let files = Files::default().with("p.sv", text);
        let result = compile(&files, "p.sv");
        assert!(result.instantiations.is_empty());
        assert_eq!(result.declarations.len(), 1);
        assert_eq!(result.declarations[0].kind, DesignUnitKind::Package);
    }

    #[test]
    fn test_keyword_positions_that_do_not_open_blocks() {
        let text = "typedef class c;\n\
                    module m;\n\
                    virtual interface bus_if vif;\n\
                    initial begin fork join_none wait fork; end\n\
                    assert property (@(posedge clk) a);\n\
                    endmodule\n\
                    class c; endclass\n";
        let files = Files::default().with("m.sv", text);
        let result = compile(&files, "m.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn test_header_parameters_recorded() {
        let text = "module fifo #(parameter int DEPTH = 16, parameter W = DEPTH*2, type T = logic [7:0], N)\n\
                    (input logic clk);\n\
                    endmodule\n\
                    module plain; endmodule\n";
        let files = Files::default().with("fifo.sv", text);
        let result = compile(&files, "fifo.sv");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let params: Vec<(&str, &str)> = result.declarations[0]
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.default.as_str()))
            .collect();
        assert_eq!(
            params,
            vec![("DEPTH", "16"), ("W", "DEPTH*2"), ("T", "logic[7:0]"), ("N", "")]
        );
        assert_eq!(result.declarations[0].ports, vec!["clk"]);
        assert!(result.declarations[1].parameters.is_empty());
        assert!(result.declarations[1].ports.is_empty());
    }

    #[test]
    fn test_header_ports_recorded() {
        let text = "module ansi(input logic clk, output logic [W-1:0] q [2], inout wire io);\n\
                    endmodule\n\
                    module classic(a, b);\n\
                    input a; output b;\n\
                    endmodule\n";
        let files = Files::default().with("ports.sv", text);
        let result = compile(&files, "ports.sv");
        assert_eq!(result.declarations[0].ports, vec!["clk", "q", "io"]);
        assert_eq!(result.declarations[1].ports, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_root_yields_empty_result() {
        let files = Files::default();
        let result = compile(&files, "nothing.sv");
        assert!(result.files_read.is_empty());
        assert!(result.diagnostics.is_empty());
    }
}
