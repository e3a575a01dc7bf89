//
// project/dotfile.rs
//
// The `.hdl-project` file in the project root
//

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::macros::Macro;
use super::ProjectError;

pub const DOTFILE_NAME: &str = ".hdl-project";

/// Persisted project settings. Keys this server does not know about are
/// carried through a rewrite untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dotfile {
    /// Excluded paths, relative to the project root with `/` separators.
    /// Paths under an imported root are stored absolute.
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    /// Absolute paths of additional compilation roots
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub macros: Vec<Macro>,
    /// Diagnostic names hidden project-wide
    #[serde(default)]
    pub project_suppressions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dotfile {
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(DOTFILE_NAME)
    }

    /// Read the dotfile of `root`. A missing file is `Ok(None)`.
    pub fn load(root: &Path) -> Result<Option<Dotfile>, ProjectError> {
        let path = Self::path_in(root);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ProjectError::Io { path, source }),
        };
        if text.trim().is_empty() {
            return Ok(Some(Dotfile::default()));
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ProjectError::Dotfile { path, source })
    }

    /// Like [`Dotfile::load`], but a malformed or unreadable file is logged
    /// and treated as empty.
    pub fn load_or_default(root: &Path) -> Dotfile {
        match Self::load(root) {
            Ok(dotfile) => dotfile.unwrap_or_default(),
            Err(e) => {
                log::warn!("Ignoring dotfile: {}", e);
                Dotfile::default()
            }
        }
    }

    pub fn save(&self, root: &Path) -> Result<(), ProjectError> {
        let path = Self::path_in(root);
        let mut text = serde_json::to_string_pretty(self).map_err(|source| ProjectError::Dotfile {
            path: path.clone(),
            source,
        })?;
        text.push('\n');
        std::fs::write(&path, text).map_err(|source| ProjectError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_dotfile() {
        let dir = TempDir::new().unwrap();
        assert!(Dotfile::load(dir.path()).unwrap().is_none());
        assert_eq!(Dotfile::load_or_default(dir.path()), Dotfile::default());
    }

    #[test]
    fn test_malformed_dotfile_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(Dotfile::path_in(dir.path()), "{ not json").unwrap();
        assert!(matches!(
            Dotfile::load(dir.path()),
            Err(ProjectError::Dotfile { .. })
        ));
        assert_eq!(Dotfile::load_or_default(dir.path()), Dotfile::default());
    }

    #[test]
    fn test_round_trip_keeps_unknown_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            Dotfile::path_in(dir.path()),
            r#"{"formatter": {"indent": 2}, "imports": ["/elsewhere"], "excludePaths": ["tb"], "macros": [{"name": "A", "value": "1"}]}"#,
        )
        .unwrap();

        let mut dotfile = Dotfile::load(dir.path()).unwrap().unwrap();
        assert_eq!(dotfile.exclude_paths, vec!["tb"]);
        assert_eq!(dotfile.imports, vec!["/elsewhere"]);
        assert_eq!(dotfile.macros, vec![Macro::new("A", "1")]);
        assert!(dotfile.project_suppressions.is_empty());

        dotfile.exclude_paths.push("sim".to_string());
        dotfile.save(dir.path()).unwrap();

        let text = std::fs::read_to_string(Dotfile::path_in(dir.path())).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["formatter"]["indent"], 2);
        assert_eq!(value["imports"][0], "/elsewhere");
        assert_eq!(value["excludePaths"][1], "sim");
        assert!(value["projectSuppressions"].as_array().unwrap().is_empty());
    }
}
