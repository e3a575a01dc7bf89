//
// handlers.rs
//
// Copyright (C) 2024-2026 Posit Software, PBC. All rights reserved.
// Modifications copyright (C) 2026 Jonathan Marc Bearak
//

use std::collections::HashSet;
use std::path::Path;

use tower_lsp::lsp_types::*;

use crate::compile::Declaration;
use crate::paths::path_to_uri;
use crate::state::WorldState;
use crate::utf16::LineIndex;

// ============================================================================
// Completion
// ============================================================================

/// Snippets offered wherever the typed prefix matches: label, snippet text
/// and a short description
const SNIPPETS: &[(&str, &str, &str)] = &[
    (
        "module",
        "module ${1:name}(\n  ${2:input logic clk},\n  ${3:input logic rst}\n);\n  ${0}\nendmodule : ${1:name}",
        "Define a module",
    ),
    ("program", "program ${1:name};\n  ${0}\nendprogram : ${1:name}", "Define a program"),
    ("class", "class ${1:name};\n  ${0}\nendclass : ${1:name}", "Define a class"),
    ("final", "final begin\n  ${0}\nend", "Insert a final block"),
    ("interface", "interface ${1:name};\n  ${0}\nendinterface : ${1:name}", "Define an interface"),
    ("package", "package ${1:name};\n  ${0}\nendpackage : ${1:name}", "Define a package"),
    (
        "function",
        "function ${1:ret_type} ${2:name}(${3:input});\n  ${0}\nendfunction : ${2:name}",
        "Define a function",
    ),
    ("task", "task ${1:name}(${2:input});\n  ${0}\nendtask : ${1:name}", "Define a task"),
    (
        "property",
        "property ${1:name} (${2:input});\n  ${0}\nendproperty : ${1:name}",
        "Define a property",
    ),
    (
        "sequence",
        "sequence ${1:name} (${2:input1, input2});\n  ${0:input1 or input2};\nendsequence : ${1:name}",
        "Define a sequence",
    ),
    ("assert", "${1:label}: assert property (${0:expr});", "Insert an assertion"),
    ("assume", "${1:label}: assume property (${0:expr});", "Insert an assumption"),
    ("cover", "${1:label}: cover property (${2:expr}) ${0:statement};", "Insert a cover"),
    ("restrict", "${1:label}: restrict property (${0:expr});", "Insert a restriction"),
    ("parameter", "parameter ${1:type} ${2:name} = ${0:value};", "Define a parameter"),
    ("localparam", "localparam ${1:type} ${2:name} = ${0:value};", "Define a local parameter"),
    (
        "typedef enum",
        "typedef enum ${1:name} {\n  ${2:ENUM1},\n  ${3:ENUM2}\n} ${0:enum_type};",
        "Define an enum",
    ),
    ("generate", "generate\n  ${0}\nendgenerate", "Generate block"),
    (
        "generate",
        "genvar ${1:i};\ngenerate\n  for (${1:i} = 0; ${1:i} < ${2:nloop}; ${1:i} = ${1:i} + 1) begin : ${3:block}\n    ${0}\n  end\nendgenerate",
        "Generate block with for loop",
    ),
    ("always_comb", "always_comb begin\n  ${0}\nend", "Insert always_comb block"),
    ("always_ff", "always_ff @(${1:posedge clk}) begin\n  ${0}\nend", "Insert always_ff block"),
    ("always", "always @(${1:posedge clk}) begin\n  ${0}\nend", "Insert always block"),
    ("initial", "initial begin\n  ${0}\nend", "Insert initial block"),
    ("$info", "\\$info(\"${0:message}\");", "Insert info message"),
    ("$warning", "\\$warning(\"${0:message}\");", "Insert warning message"),
    ("$error", "\\$error(\"${0:message}\");", "Insert error message"),
    ("$fatal", "\\$fatal(\"${0:message}\");", "Insert fatal message"),
    ("$display", "\\$display(\"${0:message}\");", "Insert display message"),
    ("$write", "\\$write(\"${0:message}\");", "Insert write message"),
    ("$strobe", "\\$strobe(\"${0:message}\");", "Insert strobe message"),
    ("$monitor", "\\$monitor(\"${0:message}\");", "Insert monitor message"),
];

/// Snippets and instantiation templates for the line up to `position`.
///
/// The prefix is everything typed on the line before the cursor, minus
/// leading whitespace, so `typedef en` still offers `typedef enum`. Needs an
/// open project and a valid license.
pub fn completion(state: &WorldState, path: &Path, position: Position) -> Option<CompletionResponse> {
    if !state.license.is_valid() || state.project.is_none() {
        return None;
    }
    let text = file_text(state, path)?;
    let index = LineIndex::new(&text);
    let cursor = index.offset(&text, position);
    let line_start = index.offset(&text, Position::new(position.line, 0));
    let prefix = text[line_start..cursor].trim_start();

    let prefix_units: u32 = prefix.chars().map(|c| c.len_utf16() as u32).sum();
    let range = Range::new(
        Position::new(position.line, position.character.saturating_sub(prefix_units)),
        position,
    );

    let mut items: Vec<CompletionItem> = SNIPPETS
        .iter()
        .filter(|(label, _, _)| label.starts_with(prefix))
        .map(|(label, snippet, description)| {
            snippet_item(label, snippet.to_string(), CompletionItemKind::KEYWORD, description, range)
        })
        .collect();

    let mut seen = HashSet::new();
    for decl in &state.declarations {
        if !decl.kind.is_instantiable() || !decl.name.starts_with(prefix) || !seen.insert(&decl.name) {
            continue;
        }
        let detail = format!("{} instantiation", decl.kind.as_str());
        items.push(snippet_item(
            &decl.name,
            instantiation_snippet(decl),
            CompletionItemKind::MODULE,
            &detail,
            range,
        ));
    }

    log::trace!("{} completions for prefix {:?}", items.len(), prefix);
    Some(CompletionResponse::List(CompletionList {
        is_incomplete: false,
        items,
    }))
}

fn snippet_item(
    label: &str,
    snippet: String,
    kind: CompletionItemKind,
    description: &str,
    range: Range,
) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        kind: Some(kind),
        detail: Some(format!(" - {}", description)),
        insert_text_format: Some(InsertTextFormat::SNIPPET),
        text_edit: Some(CompletionTextEdit::Edit(TextEdit::new(range, snippet))),
        ..Default::default()
    }
}

/// `name #(.P(${1:default})) ${2:instance_name} (.port(${3:port}));`,
/// one parameter or port per line
fn instantiation_snippet(decl: &Declaration) -> String {
    let mut tab = 0;
    let mut next_tab = || {
        tab += 1;
        tab
    };

    let mut out = decl.name.clone();
    if decl.parameters.is_empty() {
        out.push(' ');
    } else {
        let params: Vec<String> = decl
            .parameters
            .iter()
            .map(|p| format!("  .{}(${{{}:{}}})", p.name, next_tab(), escape_snippet(&p.default)))
            .collect();
        out.push_str(&format!(" #(\n{}\n) ", params.join(",\n")));
    }

    out.push_str(&format!("${{{}:instance_name}} (\n", next_tab()));
    let ports: Vec<String> = decl
        .ports
        .iter()
        .map(|port| format!("  .{}(${{{}:{}}})", port, next_tab(), port))
        .collect();
    if !ports.is_empty() {
        out.push_str(&ports.join(",\n"));
        out.push('\n');
    }
    out.push_str(");\n$0");
    out
}

/// Characters with a meaning inside snippet placeholders
fn escape_snippet(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '$' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Go to definition
// ============================================================================

/// Declarations of the design unit named under the cursor. Needs an open
/// project but no license.
pub fn goto_definition(state: &WorldState, path: &Path, position: Position) -> Option<GotoDefinitionResponse> {
    state.project.as_ref()?;
    let text = file_text(state, path)?;
    let index = LineIndex::new(&text);
    let word = word_at(&text, index.offset(&text, position))?;

    let locations: Vec<Location> = state
        .declarations
        .iter()
        .filter(|decl| decl.name == word)
        .filter_map(|decl| Some(Location::new(path_to_uri(&decl.path)?, decl.range)))
        .collect();
    log::trace!("{} definitions of {}", locations.len(), word);
    if locations.is_empty() {
        return None;
    }
    Some(GotoDefinitionResponse::Array(locations))
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Identifier touching byte `offset`, from either side
fn word_at(text: &str, offset: usize) -> Option<&str> {
    let offset = offset.min(text.len());
    let start = text[..offset]
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_word_char(*c))
        .last()
        .map_or(offset, |(i, _)| i);
    let end = text[offset..]
        .char_indices()
        .find(|(_, c)| !is_word_char(*c))
        .map_or(text.len(), |(i, _)| offset + i);
    let word = &text[start..end];
    let starts_like_identifier = word.chars().next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    starts_like_identifier.then_some(word)
}

/// Open buffer first, then disk
fn file_text(state: &WorldState, path: &Path) -> Option<String> {
    state
        .documents
        .text(path)
        .or_else(|| std::fs::read_to_string(path).ok())
}
