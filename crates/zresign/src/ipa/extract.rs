//! IPA extraction.
//!
//! Unpacks an `.ipa` container into a staging directory and locates the
//! `.app` bundle under `Payload/`.

use crate::{Error, Result};
use log::debug;
use memmap2::Mmap;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// One archive member scheduled for extraction.
struct PendingFile {
    index: usize,
    target: PathBuf,
    mode: Option<u32>,
}

impl PendingFile {
    fn is_symlink(&self) -> bool {
        cfg!(unix) && self.mode.is_some_and(|m| m & S_IFMT == S_IFLNK)
    }
}

/// Extracts `ipa_path` into `dest_dir` and returns the `.app` bundle path.
///
/// Members are decompressed in parallel from a single memory map; symlinks
/// and Unix permissions are restored. Entries whose names would escape
/// `dest_dir` are ignored.
pub fn extract_ipa(ipa_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let ipa_path = ipa_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    if !ipa_path.is_file() {
        return Err(Error::MissingFile(ipa_path.to_path_buf()));
    }

    let file = File::open(ipa_path)?;
    // SAFETY: the container is a read-only input for the lifetime of the map
    let mmap = unsafe { Mmap::map(&file)? };
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;

    fs::create_dir_all(dest_dir)?;

    let mut dirs = BTreeSet::new();
    let mut files = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let Some(name) = entry.enclosed_name() else {
            debug!("Skipping unsafe member {}", entry.name());
            continue;
        };
        let target = dest_dir.join(name);
        if entry.is_dir() {
            dirs.insert(target);
            continue;
        }
        if let Some(parent) = target.parent() {
            dirs.insert(parent.to_path_buf());
        }
        files.push(PendingFile {
            index,
            target,
            mode: entry.unix_mode(),
        });
    }

    for dir in &dirs {
        fs::create_dir_all(dir)?;
    }

    files.par_iter().try_for_each(|pending| -> Result<()> {
        let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;
        let mut entry = archive.by_index(pending.index)?;
        write_member(&mut entry, pending)
    })?;

    debug!("Extracted {} files from {}", files.len(), ipa_path.display());
    find_app_bundle(dest_dir)
}

fn write_member(entry: &mut impl Read, pending: &PendingFile) -> Result<()> {
    #[cfg(unix)]
    if pending.is_symlink() {
        let mut link_target = String::new();
        entry.read_to_string(&mut link_target)?;
        if pending.target.symlink_metadata().is_ok() {
            fs::remove_file(&pending.target)?;
        }
        std::os::unix::fs::symlink(&link_target, &pending.target)?;
        return Ok(());
    }

    let mut out = File::create(&pending.target)?;
    io::copy(entry, &mut out)?;

    #[cfg(unix)]
    if let Some(mode) = pending.mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&pending.target, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    Ok(())
}

/// Finds the first `*.app` directory under `<dir>/Payload`.
pub fn find_app_bundle(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let payload = dir.as_ref().join("Payload");
    if !payload.is_dir() {
        return Err(Error::MissingFile(payload));
    }

    let mut apps: Vec<PathBuf> = fs::read_dir(&payload)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && p.extension().is_some_and(|ext| ext == "app"))
        .collect();
    apps.sort();
    apps.into_iter()
        .next()
        .ok_or_else(|| Error::MissingFile(payload.join("*.app")))
}

/// Checks that `ipa_path` exists and starts with a ZIP signature.
pub fn validate_ipa(ipa_path: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();
    if !ipa_path.is_file() {
        return Err(Error::MissingFile(ipa_path.to_path_buf()));
    }

    let mut magic = [0u8; 2];
    File::open(ipa_path)?.read_exact(&mut magic)?;
    if &magic != b"PK" {
        return Err(Error::UnsupportedFileExtension(format!(
            "{} is not a ZIP container",
            ipa_path.display()
        )));
    }
    Ok(())
}
