//
// project/session_tests.rs
//
// Project scenarios driven end to end through a session and the compile
// engine, against real temporary directories
//

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tower_lsp::lsp_types::DiagnosticSeverity;

use super::scan::ScanLimits;
use super::{Dotfile, Macro, ProjectError, ProjectSession};
use crate::compile::{CompileEngine, DiagnosticName, PassInput, PassOutcome};
use crate::document_store::DocumentStore;
use crate::source_cache::SourceCache;

const LIMITS: ScanLimits = ScanLimits {
    max_scan_files: 10_000,
    max_project_files: 1_000,
};

struct Fixture {
    dir: TempDir,
    session: ProjectSession,
    documents: DocumentStore,
    engine: CompileEngine,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        for (rel, text) in files {
            write(dir.path(), rel, text);
        }
        let (session, _) = ProjectSession::open(dir.path(), LIMITS).unwrap();
        Self {
            dir,
            session,
            documents: DocumentStore::new(),
            engine: CompileEngine::new(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn run(&mut self, dirty: BTreeSet<PathBuf>, compile_added: bool, cross_file: bool) -> PassOutcome {
        // A fresh cache per pass so same-size rewrites are never served stale
        let sources = self
            .session
            .pass_sources(self.documents.snapshot(), Arc::new(SourceCache::new()));
        self.engine.run_pass(PassInput {
            universe: sources.universe(),
            sources: &sources,
            macros: self.session.macros(),
            macro_redefined_severity: DiagnosticSeverity::WARNING,
            dirty,
            compile_added,
            cross_file,
        })
    }

    /// Explicit recompile: everything the session holds dirty
    fn recompile(&mut self) -> PassOutcome {
        let dirty = self.session.take_dirty();
        self.run(dirty, true, true)
    }

    /// Auto-flush pass for one document event
    fn flush(&mut self, path: &Path) -> PassOutcome {
        self.run(BTreeSet::from([path.to_path_buf()]), false, true)
    }

    fn names(&self, rel: &str) -> Vec<DiagnosticName> {
        let path = self.path(rel);
        if self.session.is_excluded(&path) {
            return Vec::new();
        }
        self.engine
            .diagnostics_for(&path)
            .into_iter()
            .map(|d| d.name)
            .collect()
    }
}

fn write(root: &Path, rel: &str, text: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, text).unwrap();
    path
}

const GUARDED: &str = "module top;\n`ifndef FOO\n  `BAR\n`endif\nendmodule\n";
const BROKEN: &str = "module broken;\n  initial begin\nendmodule\n";

#[test]
fn test_missing_macro_follows_macro_table() {
    let mut fx = Fixture::new(&[("top.sv", GUARDED)]);
    fx.recompile();
    assert_eq!(fx.names("top.sv"), vec![DiagnosticName::UnknownDirective]);

    assert!(fx.session.set_macros(vec![Macro::new("FOO", "1")]));
    fx.recompile();
    assert!(fx.names("top.sv").is_empty());

    fx.session.set_macros(Vec::new());
    fx.recompile();
    assert_eq!(fx.names("top.sv"), vec![DiagnosticName::UnknownDirective]);
}

#[test]
fn test_macros_persist_to_dotfile_with_default_value() {
    let mut fx = Fixture::new(&[("top.sv", GUARDED)]);
    fx.session.set_macros(vec![Macro::new("FOO", "")]);

    let dotfile = Dotfile::load(fx.dir.path()).unwrap().unwrap();
    assert_eq!(dotfile.macros, vec![Macro::new("FOO", "1")]);
}

#[test]
fn test_one_bad_file_does_not_affect_others() {
    let mut fx = Fixture::new(&[("good.sv", "module good;\nendmodule\n"), ("broken.sv", BROKEN)]);
    let outcome = fx.recompile();

    assert!(outcome.touched.contains(&fx.path("good.sv")));
    assert!(fx.names("good.sv").is_empty());
    assert_eq!(fx.names("broken.sv"), vec![DiagnosticName::UnterminatedBlock]);
}

#[test]
fn test_missing_include_clears_when_file_appears() {
    let mut fx = Fixture::new(&[("rtl/top.sv", "`include \"defs.svh\"\nmodule top;\nendmodule\n")]);
    fx.recompile();
    assert_eq!(fx.names("rtl/top.sv"), vec![DiagnosticName::IncludeNotFound]);

    write(fx.dir.path(), "inc/defs.svh", "`define WIDTH 8\n");
    let request = fx.session.rescan(LIMITS);
    assert!(request.structure_changed);

    // Only the new file is dirty; the includer is found through the index
    let new_file = fx.path("inc/defs.svh");
    let outcome = fx.flush(&new_file);
    assert!(outcome.compiled.contains(&fx.path("rtl/top.sv")));
    assert!(fx.names("rtl/top.sv").is_empty());
}

#[test]
fn test_opened_buffer_satisfies_missing_include() {
    let mut fx = Fixture::new(&[("top.sv", "`include \"pkg.svh\"\nmodule top;\nendmodule\n")]);
    fx.recompile();
    assert_eq!(fx.names("top.sv"), vec![DiagnosticName::IncludeNotFound]);

    let pkg = fx.path("pkg.svh");
    fx.documents.open(pkg.clone(), "`define READY\n", 1);
    fx.flush(&pkg);
    assert!(fx.names("top.sv").is_empty());
}

#[test]
fn test_closing_deleted_broken_file_clears_it() {
    let mut fx = Fixture::new(&[("a.sv", "module a;\nendmodule\n")]);
    let scratch = fx.path("scratch.sv");
    fx.documents.open(scratch.clone(), BROKEN, 1);
    fx.flush(&scratch);
    assert_eq!(fx.names("scratch.sv"), vec![DiagnosticName::UnterminatedBlock]);

    fx.documents.close(&scratch);
    let outcome = fx.flush(&scratch);
    assert!(outcome.touched.contains(&scratch));
    assert!(fx.names("scratch.sv").is_empty());
}

#[test]
fn test_edit_to_header_recompiles_includer() {
    let mut fx = Fixture::new(&[
        ("top.sv", "`include \"defs.svh\"\nmodule top;\n  `WIDTH\nendmodule\n"),
        ("defs.svh", "`define WIDTH 8\n"),
    ]);
    fx.recompile();
    assert!(fx.names("top.sv").is_empty());

    let defs = fx.path("defs.svh");
    fx.documents.open(defs.clone(), "// emptied\n", 1);
    let outcome = fx.flush(&defs);
    assert!(outcome.touched.contains(&fx.path("top.sv")));
    assert_eq!(fx.names("top.sv"), vec![DiagnosticName::UnknownDirective]);
}

#[test]
fn test_redefinitions_across_roots() {
    let mut fx = Fixture::new(&[
        ("a.sv", "module dup;\nendmodule\n"),
        ("b.sv", "module dup;\nendmodule\n"),
    ]);
    fx.recompile();
    assert_eq!(fx.names("a.sv"), vec![DiagnosticName::Redefinition]);
    assert_eq!(fx.names("b.sv"), vec![DiagnosticName::Redefinition]);

    let b = fx.path("b.sv");
    fx.session.exclude(&b).unwrap();
    fx.recompile();
    assert!(fx.names("a.sv").is_empty());
}

#[test]
fn test_cross_file_checks_need_the_flag() {
    let mut fx = Fixture::new(&[("top.sv", "module top;\n  missing u0 ();\nendmodule\n")]);
    let top = fx.path("top.sv");
    fx.run(BTreeSet::from([top.clone()]), true, false);
    assert!(fx.names("top.sv").is_empty());

    fx.recompile();
    assert_eq!(fx.names("top.sv"), vec![DiagnosticName::UnknownModule]);
}

#[test]
fn test_include_two_then_exclude_one() {
    let mut fx = Fixture::new(&[("a/a.sv", BROKEN), ("b/b.sv", BROKEN)]);
    let (a_dir, b_dir) = (fx.path("a"), fx.path("b"));
    let (a, b) = (fx.path("a/a.sv"), fx.path("b/b.sv"));
    fx.session.exclude(&a_dir).unwrap();
    fx.session.exclude(&b_dir).unwrap();
    fx.recompile();
    assert!(fx.names("a/a.sv").is_empty());
    assert!(fx.names("b/b.sv").is_empty());

    fx.session.include(&a).unwrap();
    fx.session.include(&b).unwrap();
    fx.recompile();
    assert!(!fx.names("a/a.sv").is_empty());
    assert!(!fx.names("b/b.sv").is_empty());

    let request = fx.session.exclude(&a).unwrap();
    assert_eq!(request.cleared, BTreeSet::from([a.clone()]));
    fx.recompile();
    assert!(fx.names("a/a.sv").is_empty());
    assert!(!fx.names("b/b.sv").is_empty());
}

#[test]
fn test_exclusions_survive_reopen() {
    let mut fx = Fixture::new(&[("rtl/top.sv", "module top;\nendmodule\n"), ("tb/tb.sv", BROKEN)]);
    let tb = fx.path("tb");
    fx.session.exclude(&tb).unwrap();

    let (reopened, _) = ProjectSession::open(fx.dir.path(), LIMITS).unwrap();
    assert!(reopened.is_excluded(&fx.path("tb/tb.sv")));
    assert_eq!(reopened.resources().included_files().count(), 1);
}

#[test]
fn test_recompile_is_idempotent() {
    let mut fx = Fixture::new(&[
        ("top.sv", "`include \"missing.svh\"\nmodule top;\n  sub u0 ();\nendmodule\n"),
        ("sub.sv", "module sub;\n  begin\nendmodule\n"),
    ]);
    fx.recompile();
    let first: Vec<_> = ["top.sv", "sub.sv"].iter().map(|f| fx.engine.diagnostics_for(&fx.path(f))).collect();
    fx.recompile();
    let second: Vec<_> = ["top.sv", "sub.sv"].iter().map(|f| fx.engine.diagnostics_for(&fx.path(f))).collect();
    assert_eq!(first, second);
    assert!(!first[0].is_empty());
}

#[test]
fn test_recompile_covers_only_the_dirty_set() {
    let mut fx = Fixture::new(&[
        ("a.sv", BROKEN),
        ("b.sv", "`include \"defs.svh\"\nmodule b;\nendmodule\n"),
        ("c.sv", "module c;\nendmodule\n"),
        ("defs.svh", "`define W 1\n"),
    ]);
    assert_eq!(fx.recompile().compiled.len(), 3);

    let idle = fx.recompile();
    assert!(idle.compiled.is_empty());
    assert!(idle.touched.is_empty());

    fx.session.mark_dirty(fx.path("defs.svh"));
    let outcome = fx.recompile();
    assert_eq!(outcome.compiled, BTreeSet::from([fx.path("b.sv")]));
    assert!(!outcome.touched.contains(&fx.path("a.sv")));
}

#[test]
fn test_imported_root_joins_the_project() {
    let mut fx = Fixture::new(&[("top.sv", "module top;\n  lib_cell u0 ();\nendmodule\n")]);
    fx.recompile();
    assert_eq!(fx.names("top.sv"), vec![DiagnosticName::UnknownModule]);

    let lib = TempDir::new().unwrap();
    let cell = write(lib.path(), "cells/cell.sv", "module lib_cell;\nendmodule\n");
    let request = fx.session.add_root_unit(lib.path()).unwrap();
    assert!(request.structure_changed);
    assert!(fx.session.dirty().contains(&cell));

    let outcome = fx.recompile();
    assert_eq!(outcome.compiled, BTreeSet::from([cell]));
    assert!(fx.names("top.sv").is_empty());

    let dotfile = Dotfile::load(fx.dir.path()).unwrap().unwrap();
    assert_eq!(dotfile.imports, vec![lib.path().display().to_string()]);
    let (reopened, _) = ProjectSession::open(fx.dir.path(), LIMITS).unwrap();
    assert_eq!(reopened.imports().collect::<Vec<_>>(), vec![&lib.path().to_path_buf()]);
}

#[test]
fn test_root_unit_requests_are_checked() {
    let mut fx = Fixture::new(&[("rtl/top.sv", "module top;\nendmodule\n")]);
    let outside = fx.dir.path().parent().unwrap().to_path_buf();

    assert!(matches!(
        fx.session.add_root_unit(&fx.path("nope")),
        Err(ProjectError::NotFound(_))
    ));
    assert!(matches!(
        fx.session.add_root_unit(&fx.path("rtl")),
        Err(ProjectError::WithinRoot(_))
    ));
    assert!(matches!(
        fx.session.add_root_unit(&outside),
        Err(ProjectError::ParentOfRoot(_))
    ));
    assert!(matches!(
        fx.session.remove_root_unit(fx.dir.path()),
        Err(ProjectError::PrincipalRoot(_))
    ));
    assert!(matches!(
        fx.session.remove_root_unit(&fx.path("rtl")),
        Err(ProjectError::NotARoot(_))
    ));
    assert_eq!(fx.session.imports().count(), 0);
}

#[test]
fn test_removing_root_unit_clears_its_files() {
    let mut fx = Fixture::new(&[("top.sv", "module top;\nendmodule\n")]);
    let lib = TempDir::new().unwrap();
    let broken = write(lib.path(), "broken.sv", BROKEN);
    fx.session.add_root_unit(lib.path()).unwrap();
    fx.recompile();
    assert_eq!(fx.engine.diagnostics_for(&broken).len(), 1);

    let request = fx.session.remove_root_unit(lib.path()).unwrap();
    assert_eq!(request.cleared, BTreeSet::from([broken.clone()]));
    assert!(request.structure_changed);
    fx.recompile();
    assert!(fx.engine.diagnostics_for(&broken).is_empty());
    assert!(!fx.session.universe(std::iter::empty()).contains(&broken));
}

#[test]
fn test_exclusion_inside_imported_root_survives_reopen() {
    let mut fx = Fixture::new(&[("top.sv", "module top;\nendmodule\n")]);
    let lib = TempDir::new().unwrap();
    let tb = write(lib.path(), "tb/tb.sv", BROKEN);
    write(lib.path(), "cell.sv", "module cell;\nendmodule\n");
    fx.session.add_root_unit(lib.path()).unwrap();

    let request = fx.session.exclude(&lib.path().join("tb")).unwrap();
    assert_eq!(request.cleared, BTreeSet::from([tb.clone()]));
    assert!(fx.session.is_excluded(&tb));

    let dotfile = Dotfile::load(fx.dir.path()).unwrap().unwrap();
    assert_eq!(dotfile.exclude_paths, vec![lib.path().join("tb").display().to_string()]);
    let (reopened, _) = ProjectSession::open(fx.dir.path(), LIMITS).unwrap();
    assert!(reopened.is_excluded(&tb));
    assert!(reopened.universe(std::iter::empty()).contains(&lib.path().join("cell.sv")));
}

#[test]
fn test_reload_dotfile_applies_external_edits() {
    let mut fx = Fixture::new(&[("top.sv", GUARDED)]);
    fs::write(
        Dotfile::path_in(fx.dir.path()),
        r#"{"macros": [{"name": "FOO", "value": ""}], "projectSuppressions": ["UnknownDirective"]}"#,
    )
    .unwrap();

    fx.session.take_dirty();
    fx.session.reload_dotfile();
    assert_eq!(fx.session.macros().get("FOO"), Some("1"));
    assert!(fx.session.is_suppressed("UnknownDirective"));
    assert!(fx.session.dirty().contains(&fx.path("top.sv")));
}

#[test]
fn test_limit_warning_reported_once() {
    let dir = TempDir::new().unwrap();
    for i in 0..4 {
        write(dir.path(), &format!("m{}.sv", i), "module m;\nendmodule\n");
    }
    let limits = ScanLimits {
        max_scan_files: 10_000,
        max_project_files: 2,
    };
    let (mut session, request) = ProjectSession::open(dir.path(), limits).unwrap();
    assert_eq!(request.limit_warning, Some(2));
    assert_eq!(session.rescan(limits).limit_warning, None);
}
