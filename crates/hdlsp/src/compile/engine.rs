//
// compile/engine.rs
//
// Incremental recompile passes over a project's compilation units
//
// The engine owns the last result of every unit and the indexes that map a
// changed file back to the units it affects. A pass takes a dirty set,
// refreshes which files are roots, recompiles the affected units in
// parallel, reruns the cross-file checks and reports which files need their
// diagnostics republished.
//

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tower_lsp::lsp_types::DiagnosticSeverity;

use super::dependency::{scan_include_names, DependencyGraph, IncludeEdge, UnitIndex};
use super::diagnostic::{DiagnosticName, HdlDiagnostic};
use super::unit::{compile_unit, Declaration, SourceProvider, UnitOptions, UnitResult, MAX_INCLUDE_DEPTH};
use crate::paths::{hdl_file_kind, HdlFileKind};
use crate::project::macros::MacroTable;

/// Inputs of one pass, taken from a consistent snapshot of project state
pub struct PassInput<'a> {
    /// Every file the pass may compile or inline
    pub universe: &'a BTreeSet<PathBuf>,
    pub sources: &'a dyn SourceProvider,
    pub macros: &'a MacroTable,
    pub macro_redefined_severity: DiagnosticSeverity,
    pub dirty: BTreeSet<PathBuf>,
    /// Compile files the engine sees for the first time. When unset they
    /// are only indexed, so later passes can find their dependents.
    pub compile_added: bool,
    /// Run the license-gated project-wide checks
    pub cross_file: bool,
}

#[derive(Debug, Default)]
pub struct PassOutcome {
    /// Files whose diagnostics must be republished
    pub touched: BTreeSet<PathBuf>,
    pub compiled: BTreeSet<PathBuf>,
}

#[derive(Debug, Default)]
pub struct CompileEngine {
    universe: BTreeSet<PathBuf>,
    raw_includes: HashMap<PathBuf, Vec<String>>,
    graph: DependencyGraph,
    roots: BTreeSet<PathBuf>,
    units: HashMap<PathBuf, UnitResult>,
    index: UnitIndex,
    cross: HashMap<PathBuf, Vec<HdlDiagnostic>>,
}

impl CompileEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything; the next pass starts from scratch
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn roots(&self) -> &BTreeSet<PathBuf> {
        &self.roots
    }

    pub fn unit(&self, root: &Path) -> Option<&UnitResult> {
        self.units.get(root)
    }

    pub fn run_pass(&mut self, input: PassInput<'_>) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        let mut dirty = input.dirty;

        // Files entering or leaving the universe
        let added: Vec<PathBuf> = input.universe.difference(&self.universe).cloned().collect();
        let removed: Vec<PathBuf> = self.universe.difference(input.universe).cloned().collect();
        for path in &removed {
            self.raw_includes.remove(path);
            self.graph.remove_file(path);
        }
        let mut structure_changed = !added.is_empty() || !removed.is_empty();
        if input.compile_added {
            dirty.extend(added.iter().cloned());
        }
        dirty.extend(removed.iter().cloned());
        if structure_changed {
            self.universe = input.universe.clone();
        }

        for path in dirty.iter().chain(&added).filter(|p| self.universe.contains(*p)) {
            let names = input
                .sources
                .source(path)
                .map(|text| scan_include_names(&text))
                .unwrap_or_default();
            if self.raw_includes.get(path) != Some(&names) {
                self.raw_includes.insert(path.clone(), names);
                structure_changed = true;
            }
        }

        if structure_changed {
            self.rebuild_graph(input.sources);
            let roots = self.compute_roots();
            let lost: Vec<PathBuf> = self.roots.difference(&roots).cloned().collect();
            for root in lost {
                log::debug!("{} is no longer a compilation root", root.display());
                outcome.touched.extend(self.index.remove_root(&root));
                self.units.remove(&root);
                outcome.touched.insert(root);
            }
            dirty.extend(
                roots
                    .difference(&self.roots)
                    .filter(|root| input.compile_added || !added.contains(*root))
                    .cloned(),
            );
            self.roots = roots;
        }

        let batch = self.affected_roots(&dirty);
        log::debug!(
            "Recompile pass: {} dirty files, {} affected units of {} roots",
            dirty.len(),
            batch.len(),
            self.roots.len()
        );

        let options = UnitOptions {
            macros: input.macros,
            macro_redefined_severity: input.macro_redefined_severity,
        };
        let sources = input.sources;
        // A unit that panics keeps its previous result; the rest of the
        // batch still publishes
        let results: Vec<UnitResult> = batch
            .par_iter()
            .filter_map(|root| {
                panic::catch_unwind(AssertUnwindSafe(|| compile_unit(root, sources, &options)))
                    .map_err(|_| log::error!("Compiling {} panicked", root.display()))
                    .ok()
            })
            .collect();

        for result in results {
            let root = result.root.clone();
            outcome.touched.extend(self.index.remove_root(&root));
            outcome.touched.extend(result.files_read.iter().cloned());
            outcome.touched.insert(root.clone());
            self.index
                .record(&root, &result.files_read, &result.missing_includes);
            self.units.insert(root.clone(), result);
            outcome.compiled.insert(root);
        }

        let previous = std::mem::take(&mut self.cross);
        if input.cross_file {
            self.cross = self.cross_file_diagnostics();
        }
        for (path, diagnostics) in &previous {
            if self.cross.get(path) != Some(diagnostics) {
                outcome.touched.insert(path.clone());
            }
        }
        for (path, diagnostics) in &self.cross {
            if previous.get(path) != Some(diagnostics) {
                outcome.touched.insert(path.clone());
            }
        }

        // Every dirty file gets an answer, even when nothing reads it
        outcome.touched.extend(dirty);
        outcome
    }

    /// Diagnostics currently attributed to `path`, sorted and deduplicated
    pub fn diagnostics_for(&self, path: &Path) -> Vec<HdlDiagnostic> {
        let mut out: Vec<HdlDiagnostic> = self
            .index
            .roots_reading(path)
            .filter_map(|root| self.units.get(root))
            .flat_map(|unit| unit.diagnostics.iter().filter(|d| d.path == path))
            .cloned()
            .collect();
        if let Some(cross) = self.cross.get(path) {
            out.extend(cross.iter().cloned());
        }
        out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        out.dedup();
        out
    }

    /// Design units declared by the current roots, one entry per source
    /// location, ordered by name
    pub fn declarations(&self) -> Vec<Declaration> {
        let mut out: Vec<Declaration> = self
            .roots
            .iter()
            .filter_map(|root| self.units.get(root))
            .flat_map(|unit| unit.declarations.iter().cloned())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| location_key(a).cmp(&location_key(b))));
        out.dedup_by(|a, b| a.path == b.path && a.range == b.range);
        out
    }

    /// Buffer revisions of `path` that its current diagnostics were computed
    /// from. `None` entries mean disk content.
    pub fn revisions_for(&self, path: &Path) -> Vec<Option<u64>> {
        self.index
            .roots_reading(path)
            .filter_map(|root| self.units.get(root))
            .filter_map(|unit| unit.revisions.get(path).copied())
            .collect()
    }

    fn rebuild_graph(&mut self, sources: &dyn SourceProvider) {
        self.graph.clear();
        for (from, names) in &self.raw_includes {
            let dir = from.parent().unwrap_or_else(|| Path::new(""));
            let edges: Vec<IncludeEdge> = names
                .iter()
                .filter_map(|name| {
                    let to = sources.resolve_include(name, dir)?;
                    self.universe.contains(&to).then(|| IncludeEdge {
                        from: from.clone(),
                        to,
                        name: name.clone(),
                    })
                })
                .collect();
            self.graph.update_file(from, edges);
        }
        log::trace!("{}", self.graph.dump_state());
    }

    /// Included source files that no other tracked file includes
    fn compute_roots(&self) -> BTreeSet<PathBuf> {
        self.universe
            .iter()
            .filter(|path| hdl_file_kind(path) == Some(HdlFileKind::Source))
            .filter(|path| !self.graph.is_included_by_other(path))
            .cloned()
            .collect()
    }

    /// Roots whose result depends on a file in `dirty`. The unit index and
    /// the include graph are both transitive, so one lookup per file reaches
    /// every affected root.
    fn affected_roots(&self, dirty: &BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
        let mut affected = BTreeSet::new();
        for path in dirty {
            if self.roots.contains(path) {
                affected.insert(path.clone());
            }
            affected.extend(
                self.index
                    .roots_reading(path)
                    .filter(|root| self.roots.contains(*root))
                    .cloned(),
            );
            if self.universe.contains(path) {
                affected.extend(
                    self.index
                        .roots_waiting_for(path)
                        .into_iter()
                        .filter(|root| self.roots.contains(root)),
                );
            }
            affected.extend(
                self.graph
                    .get_transitive_dependents(path, MAX_INCLUDE_DEPTH)
                    .into_iter()
                    .filter(|includer| self.roots.contains(includer)),
            );
        }
        affected
    }

    fn cross_file_diagnostics(&self) -> HashMap<PathBuf, Vec<HdlDiagnostic>> {
        let mut declared: BTreeMap<&str, Vec<&Declaration>> = BTreeMap::new();
        let units: Vec<&UnitResult> = self.roots.iter().filter_map(|r| self.units.get(r)).collect();

        for unit in &units {
            for decl in &unit.declarations {
                declared.entry(decl.name.as_str()).or_default().push(decl);
            }
        }

        let mut out: HashMap<PathBuf, Vec<HdlDiagnostic>> = HashMap::new();
        for (name, decls) in declared.iter_mut() {
            // A header inlined into several units declares at one location
            decls.sort_by(|a, b| location_key(a).cmp(&location_key(b)));
            decls.dedup_by(|a, b| a.path == b.path && a.range == b.range);
            if decls.len() < 2 {
                continue;
            }
            for decl in decls.iter() {
                let other = decls
                    .iter()
                    .find(|o| o.path != decl.path || o.range != decl.range)
                    .map(|o| display_name(&o.path))
                    .unwrap_or_default();
                let message = format!(
                    "{} '{}' is already declared in {}",
                    decl.kind.as_str(),
                    name,
                    other
                );
                out.entry(decl.path.clone()).or_default().push(HdlDiagnostic::error(
                    decl.path.clone(),
                    decl.range,
                    DiagnosticName::Redefinition,
                    message,
                ));
            }
        }

        let instantiable: HashSet<&str> = declared
            .iter()
            .filter(|(_, decls)| decls.iter().any(|d| d.kind.is_instantiable()))
            .map(|(name, _)| *name)
            .collect();
        for unit in &units {
            for inst in &unit.instantiations {
                if instantiable.contains(inst.target.as_str()) {
                    continue;
                }
                let diag = HdlDiagnostic::error(
                    inst.path.clone(),
                    inst.range,
                    DiagnosticName::UnknownModule,
                    format!("unknown module '{}'", inst.target),
                );
                let entry = out.entry(inst.path.clone()).or_default();
                if !entry.contains(&diag) {
                    entry.push(diag);
                }
            }
        }

        for diagnostics in out.values_mut() {
            diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        }
        out
    }
}

fn location_key(decl: &Declaration) -> (&Path, u32, u32) {
    (&decl.path, decl.range.start.line, decl.range.start.character)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct MemSources {
        files: HashMap<PathBuf, Arc<str>>,
    }

    impl MemSources {
        fn set(&mut self, name: &str, text: &str) {
            self.files.insert(p(name), Arc::from(text));
        }

        fn universe(&self) -> BTreeSet<PathBuf> {
            self.files.keys().cloned().collect()
        }
    }

    impl SourceProvider for MemSources {
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
        PathBuf::from(format!("/proj/{}", name))
    }

    fn pass(
        engine: &mut CompileEngine,
        sources: &MemSources,
        macros: &MacroTable,
        dirty: &[&str],
        cross_file: bool,
    ) -> PassOutcome {
        let universe = sources.universe();
        engine.run_pass(PassInput {
            universe: &universe,
            sources,
            macros,
            macro_redefined_severity: DiagnosticSeverity::WARNING,
            dirty: dirty.iter().map(|n| p(n)).collect(),
            compile_added: true,
            cross_file,
        })
    }

    fn names(engine: &CompileEngine, file: &str) -> Vec<DiagnosticName> {
        engine.diagnostics_for(&p(file)).iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_headers_are_inlined_not_compiled() {
        let mut sources = MemSources::default();
        sources.set("top.sv", "`include \"defs.svh\"\nmodule top; endmodule\n");
        sources.set("defs.svh", "`define W 8\n");
        sources.set("mid.sv", "`define Z 1\n");
        sources.set("pkg.sv", "`include \"mid.sv\"\npackage p; endpackage\n");

        let mut engine = CompileEngine::new();
        pass(&mut engine, &sources, &MacroTable::new(), &[], true);

        let roots: Vec<_> = engine.roots().iter().cloned().collect();
        assert_eq!(roots, vec![p("pkg.sv"), p("top.sv")]);
    }

    #[test]
    fn test_header_edit_recompiles_includers_only() {
        let mut sources = MemSources::default();
        sources.set("top.sv", "`include \"defs.svh\"\nmodule top; localparam X = `W; endmodule\n");
        sources.set("defs.svh", "`define W 8\n");
        sources.set("other.sv", "module other; endmodule\n");

        let mut engine = CompileEngine::new();
        let macros = MacroTable::new();
        pass(&mut engine, &sources, &macros, &[], true);
        assert!(engine.diagnostics_for(&p("top.sv")).is_empty());

        sources.set("defs.svh", "// W is gone\n");
        let outcome = pass(&mut engine, &sources, &macros, &["defs.svh"], true);
        assert_eq!(outcome.compiled, BTreeSet::from([p("top.sv")]));
        assert_eq!(names(&engine, "top.sv"), vec![DiagnosticName::UnknownDirective]);
        assert!(outcome.touched.contains(&p("defs.svh")));
    }

    #[test]
    fn test_missing_include_resolves_when_file_appears() {
        let mut sources = MemSources::default();
        sources.set(
            "main.sv",
            "`include \"definitions.svh\"\nmodule main; localparam X = `FOO; endmodule\n",
        );
        let macros = MacroTable::new();
        let mut engine = CompileEngine::new();
        pass(&mut engine, &sources, &macros, &[], true);
        assert_eq!(
            names(&engine, "main.sv"),
            vec![DiagnosticName::IncludeNotFound, DiagnosticName::UnknownDirective]
        );

        sources.set("definitions.svh", "`define FOO 3\n");
        let outcome = pass(&mut engine, &sources, &macros, &["definitions.svh"], true);
        assert!(outcome.compiled.contains(&p("main.sv")));
        assert!(outcome.touched.contains(&p("main.sv")));
        assert!(engine.diagnostics_for(&p("main.sv")).is_empty());
        assert!(engine.diagnostics_for(&p("definitions.svh")).is_empty());
    }

    #[test]
    fn test_removed_file_is_touched_and_cleared() {
        let mut sources = MemSources::default();
        sources.set("bad.sv", "module bad;\n");
        let macros = MacroTable::new();
        let mut engine = CompileEngine::new();
        pass(&mut engine, &sources, &macros, &[], true);
        assert_eq!(names(&engine, "bad.sv"), vec![DiagnosticName::UnterminatedBlock]);

        sources.files.remove(&p("bad.sv"));
        let outcome = pass(&mut engine, &sources, &macros, &[], true);
        assert!(outcome.touched.contains(&p("bad.sv")));
        assert!(engine.diagnostics_for(&p("bad.sv")).is_empty());
        assert!(engine.roots().is_empty());
    }

    #[test]
    fn test_redefinition_needs_cross_file() {
        let mut sources = MemSources::default();
        sources.set("foo.sv", "module foo; endmodule\n");
        sources.set("foo2.sv", "module foo; endmodule\n");
        let macros = MacroTable::new();

        let mut engine = CompileEngine::new();
        pass(&mut engine, &sources, &macros, &[], false);
        assert!(engine.diagnostics_for(&p("foo.sv")).is_empty());

        let outcome = pass(&mut engine, &sources, &macros, &[], true);
        assert!(outcome.compiled.is_empty());
        assert!(outcome.touched.contains(&p("foo.sv")));
        assert_eq!(names(&engine, "foo.sv"), vec![DiagnosticName::Redefinition]);
        assert_eq!(names(&engine, "foo2.sv"), vec![DiagnosticName::Redefinition]);
        assert!(engine.diagnostics_for(&p("foo.sv"))[0].message.contains("foo2.sv"));
    }

    #[test]
    fn test_shared_header_declaration_is_not_a_redefinition() {
        let mut sources = MemSources::default();
        sources.set("common.svh", "module shared; endmodule\n");
        sources.set("a.sv", "`include \"common.svh\"\nmodule a; shared u(); endmodule\n");
        sources.set("b.sv", "`include \"common.svh\"\nmodule b; endmodule\n");

        let mut engine = CompileEngine::new();
        pass(&mut engine, &sources, &MacroTable::new(), &[], true);
        for file in ["a.sv", "b.sv", "common.svh"] {
            assert!(engine.diagnostics_for(&p(file)).is_empty(), "{}", file);
        }
    }

    #[test]
    fn test_unknown_module_clears_when_declared() {
        let mut sources = MemSources::default();
        sources.set("top.sv", "module top;\n  sub u_sub();\nendmodule\n");
        let macros = MacroTable::new();
        let mut engine = CompileEngine::new();
        pass(&mut engine, &sources, &macros, &[], true);
        assert_eq!(names(&engine, "top.sv"), vec![DiagnosticName::UnknownModule]);

        sources.set("sub.sv", "module sub; endmodule\n");
        let outcome = pass(&mut engine, &sources, &macros, &[], true);
        assert!(outcome.touched.contains(&p("top.sv")));
        assert!(engine.diagnostics_for(&p("top.sv")).is_empty());
    }

    #[test]
    fn test_macro_change_with_full_dirty_set() {
        let mut sources = MemSources::default();
        sources.set("m.sv", "`ifdef FOO\nmodule m; endmodule\n`else\nmodule m;\n`endif\n");
        let mut engine = CompileEngine::new();
        let all = ["m.sv"];

        let foo = MacroTable::from_macros(vec![crate::project::macros::Macro::new("FOO", "1")]);
        pass(&mut engine, &sources, &foo, &all, true);
        assert!(engine.diagnostics_for(&p("m.sv")).is_empty());

        pass(&mut engine, &sources, &MacroTable::new(), &all, true);
        assert_eq!(names(&engine, "m.sv"), vec![DiagnosticName::UnterminatedBlock]);
    }

    #[test]
    fn test_repeated_pass_is_idempotent() {
        let mut sources = MemSources::default();
        sources.set("a.sv", "module a; `X endmodule\n");
        sources.set("b.sv", "module a; endmodule\n");
        let macros = MacroTable::new();
        let mut engine = CompileEngine::new();

        pass(&mut engine, &sources, &macros, &["a.sv", "b.sv"], true);
        let first: Vec<_> = ["a.sv", "b.sv"].iter().map(|f| engine.diagnostics_for(&p(f))).collect();
        pass(&mut engine, &sources, &macros, &["a.sv", "b.sv"], true);
        let second: Vec<_> = ["a.sv", "b.sv"].iter().map(|f| engine.diagnostics_for(&p(f))).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_declarations_follow_roots() {
        let mut sources = MemSources::default();
        sources.set("common.svh", "interface bus_if; endinterface\n");
        sources.set("a.sv", "`include \"common.svh\"\nmodule a; endmodule\n");
        sources.set("b.sv", "`include \"common.svh\"\nmodule b; endmodule\n");
        let macros = MacroTable::new();
        let mut engine = CompileEngine::new();
        pass(&mut engine, &sources, &macros, &[], true);

        let decls = engine.declarations();
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "bus_if"]);

        sources.files.remove(&p("b.sv"));
        pass(&mut engine, &sources, &macros, &["b.sv"], true);
        let names: Vec<String> = engine.declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a", "bus_if"]);
    }

    #[test]
    fn test_unseen_files_indexed_without_compiling() {
        let mut sources = MemSources::default();
        sources.set("a.sv", "module a;\n");
        sources.set("b.sv", "module b;\n");
        sources.set("c.sv", "`include \"defs.svh\"\nmodule c; endmodule\n");
        sources.set("defs.svh", "`define W 8\n");
        let universe = sources.universe();
        let macros = MacroTable::new();
        let mut engine = CompileEngine::new();

        let mut document_pass = |dirty: &str| {
            engine.run_pass(PassInput {
                universe: &universe,
                sources: &sources,
                macros: &macros,
                macro_redefined_severity: DiagnosticSeverity::WARNING,
                dirty: BTreeSet::from([p(dirty)]),
                compile_added: false,
                cross_file: false,
            })
        };

        let outcome = document_pass("a.sv");
        assert_eq!(outcome.compiled, BTreeSet::from([p("a.sv")]));
        assert_eq!(outcome.touched, BTreeSet::from([p("a.sv")]));

        // The include graph is known even though c.sv was never compiled
        let outcome = document_pass("defs.svh");
        assert_eq!(outcome.compiled, BTreeSet::from([p("c.sv")]));
        assert!(!outcome.touched.contains(&p("b.sv")));

        assert!(engine.unit(&p("b.sv")).is_none());
        assert_eq!(engine.roots().len(), 3);
    }

    /// Sources whose revision lookup blows up for one file
    struct FaultySources {
        inner: MemSources,
        faulty: PathBuf,
    }

    impl SourceProvider for FaultySources {
        fn source(&self, path: &Path) -> Option<Arc<str>> {
            self.inner.source(path)
        }

        fn resolve_include(&self, name: &str, from_dir: &Path) -> Option<PathBuf> {
            self.inner.resolve_include(name, from_dir)
        }

        fn revision(&self, path: &Path) -> Option<u64> {
            if path == self.faulty {
                panic!("revision lookup failed for {}", path.display());
            }
            None
        }
    }

    #[test]
    fn test_panicking_unit_does_not_block_others() {
        let mut inner = MemSources::default();
        inner.set("bad.sv", "module bad; endmodule\n");
        inner.set("broken.sv", "module broken;\n");
        let universe = inner.universe();
        let sources = FaultySources {
            inner,
            faulty: p("bad.sv"),
        };
        let macros = MacroTable::new();
        let mut engine = CompileEngine::new();

        let outcome = engine.run_pass(PassInput {
            universe: &universe,
            sources: &sources,
            macros: &macros,
            macro_redefined_severity: DiagnosticSeverity::WARNING,
            dirty: BTreeSet::new(),
            compile_added: true,
            cross_file: true,
        });

        assert_eq!(outcome.compiled, BTreeSet::from([p("broken.sv")]));
        assert_eq!(names(&engine, "broken.sv"), vec![DiagnosticName::UnterminatedBlock]);
        assert!(outcome.touched.contains(&p("bad.sv")));
    }
}
