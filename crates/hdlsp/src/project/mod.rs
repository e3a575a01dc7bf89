//
// project/mod.rs
//
// Project state: resource set, macro table, dotfile and the session that
// ties them to the compile engine
//

use std::path::PathBuf;

use thiserror::Error;

pub mod dotfile;
pub mod macros;
pub mod resources;
pub mod scan;
pub mod session;

#[cfg(test)]
mod session_tests;

pub use dotfile::{Dotfile, DOTFILE_NAME};
pub use macros::{Macro, MacroTable};
pub use resources::{ResourceDelta, ResourceSet};
pub use session::{PassRequest, ProjectSession};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),
    #[error("path {} is outside the project root {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("path {} is already within a compilation root", .0.display())]
    WithinRoot(PathBuf),
    #[error("path {} is parent of an existing compilation root", .0.display())]
    ParentOfRoot(PathBuf),
    #[error("path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("cannot remove the principal root unit {}", .0.display())]
    PrincipalRoot(PathBuf),
    #[error("path {} is not a compilation root", .0.display())]
    NotARoot(PathBuf),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed dotfile {}: {source}", path.display())]
    Dotfile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
