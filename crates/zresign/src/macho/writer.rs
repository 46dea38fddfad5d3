//! Byte-level helpers for editing Mach-O headers in place.
//!
//! This module provides:
//! - Endian-aware `u32` reads and writes at arbitrary offsets
//! - Header field updates (`ncmds` / `sizeofcmds`)
//! - Atomic replacement of a binary on disk, so a failed patch never leaves
//!   a half-written executable behind

use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Offset of `ncmds` in both `mach_header` and `mach_header_64`.
const NCMDS_OFFSET: usize = 16;

/// Offset of `sizeofcmds` in both `mach_header` and `mach_header_64`.
const SIZEOFCMDS_OFFSET: usize = 20;

/// Writes `data` to a sibling temporary file and renames it over `path`.
///
/// The original file's permissions are carried over to the replacement.
pub fn replace_file_atomically(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = path
        .parent()
        .ok_or_else(|| Error::BinaryPatchFailed(format!("{} has no parent", path.display())))?;
    let permissions = fs::metadata(path)?.permissions();

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), permissions)?;

    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Adds `delta_cmds` commands and `delta_size` bytes to a slice header.
pub fn adjust_header(
    data: &mut [u8],
    slice_offset: usize,
    delta_cmds: i64,
    delta_size: i64,
    big_endian: bool,
) {
    let ncmds_at = slice_offset + NCMDS_OFFSET;
    let sizeofcmds_at = slice_offset + SIZEOFCMDS_OFFSET;

    let ncmds = read_u32(data, ncmds_at, big_endian) as i64 + delta_cmds;
    let sizeofcmds = read_u32(data, sizeofcmds_at, big_endian) as i64 + delta_size;

    write_u32(data, ncmds_at, ncmds as u32, big_endian);
    write_u32(data, sizeofcmds_at, sizeofcmds as u32, big_endian);
}

/// Aligns a value up to the specified alignment.
pub fn align_to(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Reads a u32 from a byte slice at the given offset.
pub fn read_u32(data: &[u8], offset: usize, big_endian: bool) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}

/// Writes a u32 to a byte slice at the given offset.
pub fn write_u32(data: &mut [u8], offset: usize, value: u32, big_endian: bool) {
    let bytes = if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    };
    data[offset..offset + 4].copy_from_slice(&bytes);
}
