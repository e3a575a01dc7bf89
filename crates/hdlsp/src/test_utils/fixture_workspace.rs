//! Deterministic fixture project generator for benchmarks and tests.
//!
//! Generates synthetic SystemVerilog projects with controlled
//! characteristics: module count, an instantiation chain, shared include
//! headers and filler statements per module.
//!
//! Output is deterministic so benchmarks are reproducible.

use std::fmt::Write;
use std::path::Path;
use tempfile::TempDir;

/// Configuration for generating a fixture project.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub module_count: usize,
    /// `m_0` instantiates `m_1`, which instantiates `m_2`, and so on
    pub instance_chain_depth: usize,
    /// Headers under `inc/`, each included by every module
    pub header_count: usize,
    pub statements_per_module: usize,
}

impl FixtureConfig {
    /// 10 modules, chain depth 3, one header.
    pub fn small() -> Self {
        Self {
            module_count: 10,
            instance_chain_depth: 3,
            header_count: 1,
            statements_per_module: 5,
        }
    }

    /// 50 modules, chain depth 10, two headers.
    pub fn medium() -> Self {
        Self {
            module_count: 50,
            instance_chain_depth: 10,
            header_count: 2,
            statements_per_module: 20,
        }
    }

    /// 200 modules, chain depth 15, four headers.
    pub fn large() -> Self {
        Self {
            module_count: 200,
            instance_chain_depth: 15,
            header_count: 4,
            statements_per_module: 40,
        }
    }
}

fn generate_header_content(index: usize) -> String {
    let mut content = String::new();
    writeln!(content, "`ifndef DEFS_{}_SVH", index).unwrap();
    writeln!(content, "`define DEFS_{}_SVH", index).unwrap();
    writeln!(content, "`define WIDTH_{} {}", index, 8 * (index + 1)).unwrap();
    writeln!(content, "`endif").unwrap();
    content
}

/// Generate the content of module `index` deterministically.
fn generate_module_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();

    for header in 0..config.header_count {
        writeln!(content, "`include \"defs_{}.svh\"", header).unwrap();
    }
    writeln!(content, "module m_{};", index).unwrap();

    for stmt in 0..config.statements_per_module {
        writeln!(content, "  logic [7:0] r_{};", stmt).unwrap();
        writeln!(content, "  always_comb begin").unwrap();
        writeln!(content, "    r_{} = 8'd{};", stmt, stmt % 256).unwrap();
        writeln!(content, "  end").unwrap();
    }

    if index < config.instance_chain_depth && index + 1 < config.module_count {
        writeln!(content, "  m_{} u_next ();", index + 1).unwrap();
    }
    writeln!(content, "endmodule").unwrap();
    content
}

/// Create a temporary fixture project from the given configuration.
///
/// Calling this twice with the same `FixtureConfig` produces byte-identical files.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture project");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory: modules under `rtl/`,
/// headers under `inc/`.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    let rtl = dir.join("rtl");
    let inc = dir.join("inc");
    std::fs::create_dir_all(&rtl).expect("Failed to create rtl/");
    std::fs::create_dir_all(&inc).expect("Failed to create inc/");

    for i in 0..config.header_count {
        let filepath = inc.join(format!("defs_{}.svh", i));
        std::fs::write(&filepath, generate_header_content(i))
            .unwrap_or_else(|e| panic!("Failed to write {}: {}", filepath.display(), e));
    }
    for i in 0..config.module_count {
        let filepath = rtl.join(format!("m_{}.sv", i));
        std::fs::write(&filepath, generate_module_content(i, config))
            .unwrap_or_else(|e| panic!("Failed to write {}: {}", filepath.display(), e));
    }
}
