//! Load-command patching for dylib references.
//!
//! Every operation parses the executable, edits a copy of its bytes slice by
//! slice, and replaces the file atomically. The file size never changes:
//! inserted commands consume the zero padding between the load-command block
//! and the first section, and removed commands give that padding back.

use crate::{Error, Result};
use log::{debug, info};
use std::path::Path;

use super::parser::{
    is_library_command, ArchSlice, MachOFile, LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB,
};
use super::writer::{adjust_header, align_to, replace_file_atomically, write_u32};

/// `dylib_command` header: cmd, cmdsize, name offset, timestamp,
/// current_version, compatibility_version.
const DYLIB_COMMAND_SIZE: usize = 24;

/// Default timestamp recorded in inserted commands.
const DYLIB_TIMESTAMP: u32 = 2;

/// A library reference as seen by `list_library_references`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryReference {
    /// CPU type of the slice carrying the reference
    pub cpu_type: u32,
    /// Raw load-command kind
    pub cmd: u32,
    /// Install name
    pub path: String,
}

impl LibraryReference {
    /// Whether the reference is weak.
    pub fn is_weak(&self) -> bool {
        self.cmd == LC_LOAD_WEAK_DYLIB
    }
}

/// Replaces every dependency whose install name equals `old` with `new`.
///
/// Returns the number of commands rewritten across all slices. A path that
/// has already been rewritten matches nothing, so the call is a no-op.
pub fn rewrite_library_path(
    executable: impl AsRef<Path>,
    old: &str,
    new: &str,
) -> Result<usize> {
    let executable = executable.as_ref();
    let macho = MachOFile::open(executable)?;
    let slices = macho.slices().to_vec();
    let mut data = macho.into_data();
    let mut rewritten = 0;

    for slice in &slices {
        for lib in slice.libraries.iter().filter(|l| !l.is_id() && l.path == old) {
            if new.len() + 1 > lib.path_capacity() {
                return Err(Error::BinaryPatchFailed(format!(
                    "{} does not fit in the {}-byte name field of {}",
                    new,
                    lib.path_capacity(),
                    executable.display()
                )));
            }
            let start = slice.offset + lib.offset + lib.name_offset as usize;
            let end = slice.offset + lib.offset + lib.cmdsize as usize;
            let field = &mut data[start..end];
            field.fill(0);
            field[..new.len()].copy_from_slice(new.as_bytes());
            rewritten += 1;
        }
    }

    if rewritten > 0 {
        replace_file_atomically(executable, &data)?;
        debug!("Rewrote {} -> {} in {} ({} commands)", old, new, executable.display(), rewritten);
    }
    Ok(rewritten)
}

/// Appends a dylib load command referencing `path` to every slice.
///
/// Slices that already depend on `path` are left alone. Returns the number
/// of slices that received a new command.
pub fn insert_library_reference(
    executable: impl AsRef<Path>,
    path: &str,
    weak: bool,
) -> Result<usize> {
    let executable = executable.as_ref();
    let macho = MachOFile::open(executable)?;
    let slices = macho.slices().to_vec();
    let mut data = macho.into_data();
    let mut inserted = 0;

    for slice in &slices {
        if slice.find_library(path).is_some() {
            debug!("{} already references {}", executable.display(), path);
            continue;
        }
        let command = build_dylib_command(path, weak, slice);
        if command.len() > slice.free_space() {
            return Err(Error::BinaryPatchFailed(format!(
                "Not enough header padding in {} for {} ({} needed, {} free)",
                executable.display(),
                path,
                command.len(),
                slice.free_space()
            )));
        }

        let at = slice.offset + slice.commands_end();
        data[at..at + command.len()].copy_from_slice(&command);
        adjust_header(&mut data, slice.offset, 1, command.len() as i64, slice.big_endian);
        inserted += 1;
    }

    if inserted > 0 {
        replace_file_atomically(executable, &data)?;
        info!("Injected {} into {}", path, executable.display());
    }
    Ok(inserted)
}

/// Deletes every dependency whose install name is in `paths`.
///
/// Returns the number of commands removed across all slices.
pub fn remove_library_references(
    executable: impl AsRef<Path>,
    paths: &[impl AsRef<str>],
) -> Result<usize> {
    let executable = executable.as_ref();
    let macho = MachOFile::open(executable)?;
    let slices = macho.slices().to_vec();
    let mut data = macho.into_data();
    let mut removed = 0;

    for slice in &slices {
        // Walk matches back to front so earlier offsets stay valid.
        let mut targets: Vec<_> = slice
            .libraries
            .iter()
            .filter(|l| is_library_command(l.cmd))
            .filter(|l| paths.iter().any(|p| p.as_ref() == l.path))
            .collect();
        targets.sort_by_key(|l| std::cmp::Reverse(l.offset));

        let end = slice.offset + slice.commands_end();
        for lib in targets {
            let start = slice.offset + lib.offset;
            let size = lib.cmdsize as usize;
            data.copy_within(start + size..end, start);
            data[end - size..end].fill(0);
            adjust_header(&mut data, slice.offset, -1, -(size as i64), slice.big_endian);
            debug!("Removed {} from {}", lib.path, executable.display());
            removed += 1;
        }
    }

    if removed > 0 {
        replace_file_atomically(executable, &data)?;
    }
    Ok(removed)
}

/// Lists every dylib reference in every slice, in header order.
pub fn list_library_references(executable: impl AsRef<Path>) -> Result<Vec<LibraryReference>> {
    let macho = MachOFile::open(executable)?;
    Ok(macho
        .slices()
        .iter()
        .flat_map(|slice| {
            slice
                .libraries
                .iter()
                .filter(|l| is_library_command(l.cmd))
                .map(move |l| LibraryReference {
                    cpu_type: slice.cpu_type,
                    cmd: l.cmd,
                    path: l.path.clone(),
                })
        })
        .collect())
}

/// Encodes a `dylib_command` for `path`, padded to the slice's alignment.
fn build_dylib_command(path: &str, weak: bool, slice: &ArchSlice) -> Vec<u8> {
    let alignment = if slice.is_64 { 8 } else { 4 };
    let cmdsize = align_to(DYLIB_COMMAND_SIZE + path.len() + 1, alignment);
    let cmd = if weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB };
    let be = slice.big_endian;

    let mut command = vec![0u8; cmdsize];
    write_u32(&mut command, 0, cmd, be);
    write_u32(&mut command, 4, cmdsize as u32, be);
    write_u32(&mut command, 8, DYLIB_COMMAND_SIZE as u32, be);
    write_u32(&mut command, 12, DYLIB_TIMESTAMP, be);
    // current_version and compatibility_version stay 0
    command[DYLIB_COMMAND_SIZE..DYLIB_COMMAND_SIZE + path.len()].copy_from_slice(path.as_bytes());
    command
}
