//! IPA creation.
//!
//! Packs a published `.app` bundle back into a `Payload/` ZIP container,
//! preserving symlinks and Unix permissions.
//!
//! # Examples
//!
//! ```no_run
//! use zresign::ipa::{create_ipa, CompressionLevel};
//!
//! create_ipa("Signed/MyApp.app", "MyApp.ipa", CompressionLevel::DEFAULT)?;
//! # Ok::<(), zresign::Error>(())
//! ```

use crate::{Error, Result};
use log::debug;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// ZIP compression level, clamped to 0-9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// Stored, no compression.
    pub const NONE: CompressionLevel = CompressionLevel(0);
    /// Deflate level 6.
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);
    /// Deflate level 9.
    pub const MAX: CompressionLevel = CompressionLevel(9);

    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(&self) -> SimpleFileOptions {
        if self.0 == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.0 as i64))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Writes `app_bundle` into `output` as `Payload/<name>.app/...`.
pub fn create_ipa(
    app_bundle: impl AsRef<Path>,
    output: impl AsRef<Path>,
    compression: CompressionLevel,
) -> Result<()> {
    let app_bundle = app_bundle.as_ref();
    let output = output.as_ref();

    if !app_bundle.is_dir() {
        return Err(Error::MissingFile(app_bundle.to_path_buf()));
    }
    let app_name = app_bundle
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::MissingFile(app_bundle.to_path_buf()))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let options = compression.file_options();
    let mut zip = ZipWriter::new(File::create(output)?);
    zip.add_directory("Payload/", options)?;

    let mut count = 0usize;
    for entry in WalkDir::new(app_bundle).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let path = entry.path();
        let relative = path
            .strip_prefix(app_bundle)
            .map_err(|e| Error::Io(io::Error::other(e.to_string())))?;
        let name = if relative.as_os_str().is_empty() {
            format!("Payload/{}/", app_name)
        } else {
            format!("Payload/{}/{}", app_name, relative.to_string_lossy())
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            let name = if name.ends_with('/') { name } else { format!("{}/", name) };
            zip.add_directory(name, options)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(path)?;
            zip.add_symlink(name, target.to_string_lossy(), options)?;
        } else {
            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                let metadata = entry.metadata().map_err(io::Error::from)?;
                options.unix_permissions(metadata.permissions().mode())
            };
            zip.start_file(name, options)?;
            io::copy(&mut File::open(path)?, &mut zip)?;
            count += 1;
        }
    }

    zip.finish()?;
    debug!("Packed {} files from {} into {}", count, app_bundle.display(), output.display());
    Ok(())
}
