//! Discovery of libraries bundled inside an unpacked package payload.

use super::source::SourceKind;
use crate::Result;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix used by rootless jailbreak packages.
const ROOTLESS_PREFIX: &str = "var/jb";

const FRAMEWORKS: &str = "Library/Frameworks";
const DYNAMIC_LIBRARIES: &str = "Library/MobileSubstrate/DynamicLibraries";
const APPLICATION_SUPPORT: &str = "Library/Application Support";

/// Something in a payload that should be installed into the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadItem {
    pub path: PathBuf,
    pub kind: SourceKind,
}

/// Lists installable items under a payload root.
///
/// Frameworks come first so that a substrate framework shipped in the same
/// package is in place before the libraries that link it. Each location is
/// also checked under the rootless prefix. Symlinks are never followed.
pub fn scan_payload(root: &Path) -> Result<Vec<PayloadItem>> {
    let mut items = Vec::new();

    for base in [FRAMEWORKS, DYNAMIC_LIBRARIES, APPLICATION_SUPPORT] {
        for prefix in ["", ROOTLESS_PREFIX] {
            let dir = if prefix.is_empty() {
                root.join(base)
            } else {
                root.join(prefix).join(base)
            };
            if !dir.is_dir() {
                continue;
            }
            match base {
                FRAMEWORKS => collect(&dir, SourceKind::Framework, &mut items)?,
                DYNAMIC_LIBRARIES => collect(&dir, SourceKind::StandaloneLibrary, &mut items)?,
                _ => collect_bundles(&dir, &mut items)?,
            }
        }
    }

    debug!("{}: {} installable items", root.display(), items.len());
    Ok(items)
}

/// Sorted children of `dir`, without symlinks and hidden entries
/// (`.DS_Store`, `._*` AppleDouble files).
fn children(dir: &Path) -> Result<Vec<(PathBuf, fs::FileType)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;
        if !file_type.is_symlink() {
            out.push((entry.path(), file_type));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn collect(dir: &Path, kind: SourceKind, items: &mut Vec<PayloadItem>) -> Result<()> {
    for (path, file_type) in children(dir)? {
        let wants_dir = kind != SourceKind::StandaloneLibrary;
        if file_type.is_dir() == wants_dir && SourceKind::from_path(&path) == kind {
            items.push(PayloadItem { path, kind });
        }
    }
    Ok(())
}

fn collect_bundles(dir: &Path, items: &mut Vec<PayloadItem>) -> Result<()> {
    for (path, file_type) in children(dir)? {
        if !file_type.is_dir() {
            continue;
        }
        if SourceKind::from_path(&path) == SourceKind::Bundle {
            items.push(PayloadItem {
                path,
                kind: SourceKind::Bundle,
            });
        } else {
            collect_bundles(&path, items)?;
        }
    }
    Ok(())
}
