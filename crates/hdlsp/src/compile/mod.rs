//
// compile/mod.rs
//
// Compile unit engine: per-unit analysis, dependency tracking and
// incremental passes
//

pub mod dependency;
pub mod diagnostic;
pub mod engine;
pub mod lexer;
pub mod sources;
pub mod unit;

pub use diagnostic::{DiagnosticName, HdlDiagnostic};
pub use engine::{CompileEngine, PassInput, PassOutcome};
pub use sources::PassSources;
pub use unit::{compile_unit, Declaration, DesignUnitKind, Parameter, SourceProvider, UnitOptions, UnitResult};
