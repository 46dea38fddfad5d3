//! Per-run working state.

use crate::bundle::{copy_tree, AppBundle, BundleDescriptor};
use crate::ipa::extract_ipa;
use crate::{Error, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Directory under the storage root holding in-progress runs.
pub const STAGING_DIR: &str = ".staging";

/// The staged working copy owned by one run.
///
/// Dropping the context removes the staging directory along with whatever
/// is still in it.
pub struct PipelineContext {
    staging: TempDir,
    app: AppBundle,
    descriptor: BundleDescriptor,
}

impl PipelineContext {
    /// Copies or extracts `input` into a fresh staging directory.
    ///
    /// `input` is either a `.app` directory or an `.ipa` file.
    pub fn stage(
        storage_root: &Path,
        input: &Path,
        source_url: Option<String>,
    ) -> Result<Self> {
        if input.symlink_metadata().is_err() {
            return Err(Error::MissingFile(input.to_path_buf()));
        }

        let parent = storage_root.join(STAGING_DIR);
        fs::create_dir_all(&parent)?;
        let staging = tempfile::Builder::new().prefix("run-").tempdir_in(&parent)?;

        let ext = input
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let app_path = match ext.as_str() {
            "app" if input.is_dir() => {
                let name = input
                    .file_name()
                    .ok_or_else(|| Error::MissingFile(input.to_path_buf()))?;
                let dest = staging.path().join(name);
                copy_tree(input, &dest)?;
                dest
            }
            "ipa" => extract_ipa(input, staging.path().join("unpacked"))?,
            _ => return Err(Error::UnsupportedFileExtension(ext)),
        };

        let app = AppBundle::new(app_path);
        let descriptor = app.descriptor(source_url)?;
        info!(
            "Staged {} {} ({}) in {}",
            descriptor.name,
            descriptor.version,
            descriptor.bundle_id,
            staging.path().display()
        );
        Ok(Self {
            staging,
            app,
            descriptor,
        })
    }

    pub fn app(&self) -> &AppBundle {
        &self.app
    }

    /// Snapshot of the input taken right after staging.
    pub fn descriptor(&self) -> &BundleDescriptor {
        &self.descriptor
    }

    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    /// Bundles the run edits: the app, then its extensions when requested.
    pub fn targets(&self, include_extensions: bool) -> Result<Vec<AppBundle>> {
        let mut targets = vec![self.app.clone()];
        if include_extensions {
            let plugins = self.app.plugins()?;
            debug!("{} extensions", plugins.len());
            targets.extend(plugins);
        }
        Ok(targets)
    }

    /// File name of the staged `.app`.
    pub fn app_name(&self) -> String {
        self.app
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn app_path(&self) -> PathBuf {
        self.app.path().to_path_buf()
    }
}
