//! App bundle layout helpers.
//!
//! This module provides:
//! - [`AppBundle`], a thin view over a `.app` / `.appex` / `.framework`
//!   directory that knows where its manifest, executable and frameworks live
//! - [`BundleDescriptor`], the immutable identity snapshot taken at staging
//! - [`copy_tree`], a symlink-preserving recursive copy
//! - [`manifest`] and [`localize`] for `Info.plist` rewriting

pub mod localize;
pub mod manifest;

pub use manifest::Manifest;

use crate::{Error, Result};
use log::debug;
use plist::{Dictionary, Value};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory holding embedded libraries and frameworks.
pub const FRAMEWORKS_DIR: &str = "Frameworks";
/// Directory holding app extensions.
pub const PLUGINS_DIR: &str = "PlugIns";
/// Profile copied into every signed bundle.
pub const EMBEDDED_PROFILE: &str = "embedded.mobileprovision";

/// A bundle directory on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBundle {
    root: PathBuf,
}

impl AppBundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn info_plist_path(&self) -> PathBuf {
        self.root.join("Info.plist")
    }

    pub fn frameworks_dir(&self) -> PathBuf {
        self.root.join(FRAMEWORKS_DIR)
    }

    /// Reads `Info.plist` as a dictionary.
    pub fn read_info(&self) -> Result<Dictionary> {
        let path = self.info_plist_path();
        if !path.is_file() {
            return Err(Error::MissingFile(path));
        }
        Value::from_file(&path)?
            .into_dictionary()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} is not a dictionary", path.display()),
                ))
            })
    }

    /// Path of the main executable named by `CFBundleExecutable`.
    ///
    /// `None` when the manifest is unreadable, the key is absent, or the
    /// named file does not exist.
    pub fn find_executable(&self) -> Option<PathBuf> {
        let info = match self.read_info() {
            Ok(info) => info,
            Err(e) => {
                debug!("{}: no readable manifest: {}", self.root.display(), e);
                return None;
            }
        };
        let name = info.get("CFBundleExecutable")?.as_string()?;
        let exe = self.root.join(name);
        if exe.is_file() {
            Some(exe)
        } else {
            debug!("{}: executable {} not found", self.root.display(), name);
            None
        }
    }

    /// App extensions under `PlugIns/`, sorted by name.
    pub fn plugins(&self) -> Result<Vec<AppBundle>> {
        let dir = self.root.join(PLUGINS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut plugins: Vec<_> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir() && p.extension().is_some_and(|e| e == "appex"))
            .map(AppBundle::new)
            .collect();
        plugins.sort_by(|a, b| a.root.cmp(&b.root));
        Ok(plugins)
    }

    /// Snapshot of the declared identity.
    pub fn descriptor(&self, source_url: Option<String>) -> Result<BundleDescriptor> {
        let info = self.read_info()?;
        let get = |key: &str| info.get(key).and_then(Value::as_string).map(str::to_string);
        let stem = self
            .root
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(BundleDescriptor {
            name: get("CFBundleDisplayName")
                .or_else(|| get("CFBundleName"))
                .unwrap_or(stem),
            version: get("CFBundleShortVersionString")
                .or_else(|| get("CFBundleVersion"))
                .unwrap_or_default(),
            bundle_id: get("CFBundleIdentifier").unwrap_or_default(),
            source_url,
        })
    }
}

/// Identity of the input app, captured once when staging completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDescriptor {
    pub name: String,
    pub version: String,
    pub bundle_id: String,
    pub source_url: Option<String>,
}

/// Recursively copies `src` to `dst`, recreating symlinks rather than
/// following them.
pub fn copy_tree(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)?;
    Ok(())
}

/// Moves `src` to `dst` unless `dst` already exists.
///
/// Returns `false` (and leaves both untouched) when the destination is taken.
/// Falls back to copy-and-delete across filesystems.
pub fn move_no_clobber(src: &Path, dst: &Path) -> Result<bool> {
    if dst.symlink_metadata().is_ok() {
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_err() {
        copy_tree(src, dst)?;
        if src.is_dir() {
            fs::remove_dir_all(src)?;
        } else {
            fs::remove_file(src)?;
        }
    }
    Ok(true)
}


#[cfg(test)]
mod tests {
    use super::testutil::make_app;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_descriptor_and_executable() {
        let temp_dir = TempDir::new().unwrap();
        let app = AppBundle::new(make_app(temp_dir.path(), "Demo", b"exe"));

        let desc = app.descriptor(Some("https://example.com/repo".into())).unwrap();
        assert_eq!(desc.name, "Demo");
        assert_eq!(desc.version, "1.0");
        assert_eq!(desc.bundle_id, "com.example.demo");
        assert_eq!(desc.source_url.as_deref(), Some("https://example.com/repo"));

        assert_eq!(app.find_executable(), Some(app.path().join("Demo")));
    }

    #[test]
    fn test_find_executable_missing() {
        let temp_dir = TempDir::new().unwrap();
        let app_path = make_app(temp_dir.path(), "Demo", b"exe");
        fs::remove_file(app_path.join("Demo")).unwrap();
        assert_eq!(AppBundle::new(&app_path).find_executable(), None);

        fs::remove_file(app_path.join("Info.plist")).unwrap();
        assert_eq!(AppBundle::new(&app_path).find_executable(), None);
    }

    #[test]
    fn test_plugins_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let app = make_app(temp_dir.path(), "Demo", b"exe");
        fs::create_dir_all(app.join("PlugIns/B.appex")).unwrap();
        fs::create_dir_all(app.join("PlugIns/A.appex")).unwrap();
        fs::write(app.join("PlugIns/readme.txt"), b"").unwrap();

        let plugins = AppBundle::new(&app).plugins().unwrap();
        let names: Vec<_> = plugins
            .iter()
            .map(|p| p.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["A.appex", "B.appex"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_tree_preserves_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("Versions/A")).unwrap();
        fs::write(src.join("Versions/A/Lib"), b"lib").unwrap();
        std::os::unix::fs::symlink("A", src.join("Versions/Current")).unwrap();

        let dst = temp_dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("Versions/A/Lib")).unwrap(), b"lib");
        let link = dst.join("Versions/Current");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("A"));
    }

    #[test]
    fn test_move_no_clobber() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.dylib");
        let b = temp_dir.path().join("sub/b.dylib");
        fs::write(&a, b"first").unwrap();

        assert!(move_no_clobber(&a, &b).unwrap());
        assert!(!a.exists());

        fs::write(&a, b"second").unwrap();
        assert!(!move_no_clobber(&a, &b).unwrap());
        assert_eq!(fs::read(&b).unwrap(), b"first");
        assert!(a.exists());
    }
}
