//
// paths.rs
//
// Path normalization and URI conversion for project files
//

use std::path::{Component, Path, PathBuf};

use url::Url;

/// SystemVerilog source extensions. Files with these extensions may be
/// compilation roots.
pub const SOURCE_EXTENSIONS: &[&str] = &["sv", "v", "SV", "V", "verilog"];

/// Header extensions. Header files are only ever compiled through an
/// `` `include `` from another file.
pub const HEADER_EXTENSIONS: &[&str] = &["svh", "vh", "SVH", "VH", "verilogh", "h"];

/// Kind of a tracked HDL file, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HdlFileKind {
    Source,
    Header,
}

pub fn hdl_file_kind(path: &Path) -> Option<HdlFileKind> {
    let ext = path.extension()?.to_str()?;
    if SOURCE_EXTENSIONS.contains(&ext) {
        Some(HdlFileKind::Source)
    } else if HEADER_EXTENSIONS.contains(&ext) {
        Some(HdlFileKind::Header)
    } else {
        None
    }
}

pub fn is_hdl_file(path: &Path) -> bool {
    hdl_file_kind(path).is_some()
}

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem. Files that were deleted still normalize to the same key they
/// had while they existed.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_parent = matches!(out.components().next_back(), Some(Component::ParentDir));
                if at_parent || !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `true` when `path` equals `ancestor` or lies underneath it.
pub fn is_path_part_of_path(path: &Path, ancestor: &Path) -> bool {
    path.starts_with(ancestor)
}

pub fn uri_to_path(uri: &Url) -> Option<PathBuf> {
    if uri.scheme() != "file" {
        return None;
    }
    uri.to_file_path().ok().map(|p| normalize_path(&p))
}

pub fn path_to_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}

/// Relative path of `path` under `root`, using `/` separators so the
/// project dotfile is portable.
pub fn relative_to_root(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
