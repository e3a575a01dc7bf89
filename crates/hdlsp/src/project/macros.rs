//
// project/macros.rs
//
// Project-wide preprocessor macro table
//

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// SystemVerilog simple identifier, the only legal `` `define `` name
fn is_macro_identifier(name: &str) -> bool {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap())
        .is_match(name)
}

/// A `{name, value}` pair as exchanged with the client and stored in the
/// project dotfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Macro {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Macros applied to every compiled file. Insertion order is kept so the
/// dotfile round-trips in the order the user wrote it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroTable {
    macros: IndexMap<String, String>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a macro list. Blank or malformed names are dropped, an empty
    /// value means `1`, and a later duplicate replaces an earlier one.
    pub fn from_macros<I>(macros: I) -> Self
    where
        I: IntoIterator<Item = Macro>,
    {
        let mut table = IndexMap::new();
        for m in macros {
            let name = m.name.trim();
            if name.is_empty() {
                log::warn!("Ignoring macro with empty name");
                continue;
            }
            if !is_macro_identifier(name) {
                log::warn!("Ignoring macro with invalid name '{}'", name);
                continue;
            }
            let value = m.value.trim();
            let value = if value.is_empty() { "1" } else { value };
            table.insert(name.to_string(), value.to_string());
        }
        Self { macros: table }
    }

    /// Replace the whole table. Returns `true` when the effective
    /// definitions changed.
    pub fn replace<I>(&mut self, macros: I) -> bool
    where
        I: IntoIterator<Item = Macro>,
    {
        let next = Self::from_macros(macros);
        let changed = !self.same_definitions(&next);
        *self = next;
        changed
    }

    fn same_definitions(&self, other: &MacroTable) -> bool {
        self.macros.len() == other.macros.len()
            && self
                .macros
                .iter()
                .all(|(k, v)| other.macros.get(k) == Some(v))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.macros.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn to_macros(&self) -> Vec<Macro> {
        self.iter().map(|(k, v)| Macro::new(k, v)).collect()
    }

    /// Command-line style `NAME=VALUE` strings, for logging
    pub fn defines(&self) -> Vec<String> {
        self.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}
