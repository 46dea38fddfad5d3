//! Mach-O file parsing using goblin
//!
//! Produces a flat view of every architecture slice: where its header lives,
//! how large the load-command block is, how much zero padding follows it, and
//! which dylib load commands it carries. The patcher works from this view.

use crate::{Error, Result};
use goblin::mach::header::MH_EXECUTE;
use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};
use std::path::Path;

use super::writer::read_u32;

/// `LC_LOAD_DYLIB`
pub const LC_LOAD_DYLIB: u32 = 0xc;
/// `LC_ID_DYLIB`
pub const LC_ID_DYLIB: u32 = 0xd;
/// `LC_LOAD_WEAK_DYLIB`
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
/// `LC_REEXPORT_DYLIB`
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
/// `LC_LAZY_LOAD_DYLIB`
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
/// `LC_LOAD_UPWARD_DYLIB`
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;

const LC_REQ_DYLD: u32 = 0x8000_0000;

/// Size of `mach_header`
pub const MACH_HEADER_SIZE: usize = 28;
/// Size of `mach_header_64`
pub const MACH_HEADER_64_SIZE: usize = 32;

/// Represents a parsed Mach-O file
pub struct MachOFile {
    /// Raw file data
    data: Vec<u8>,
    /// Is FAT binary
    is_fat: bool,
    /// Architecture slices
    slices: Vec<ArchSlice>,
}

/// A single architecture slice
#[derive(Debug, Clone)]
pub struct ArchSlice {
    /// Offset of the slice header in the file
    pub offset: usize,
    /// Size of slice
    pub size: usize,
    /// CPU type
    pub cpu_type: u32,
    /// Is 64-bit
    pub is_64: bool,
    /// Header fields are stored big-endian
    pub big_endian: bool,
    /// Is executable (MH_EXECUTE)
    pub is_executable: bool,
    /// Number of load commands (`ncmds`)
    pub ncmds: u32,
    /// Size of the load-command block (`sizeofcmds`)
    pub sizeofcmds: u32,
    /// Slice-relative offset of the first byte of section or segment data.
    /// Load commands must end at or before this offset.
    pub data_start: usize,
    /// Dylib-style load commands, in header order
    pub libraries: Vec<LibraryCommand>,
}

/// A dylib load command inside a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCommand {
    /// Slice-relative offset of the command
    pub offset: usize,
    /// Raw `cmd` value
    pub cmd: u32,
    /// `cmdsize`
    pub cmdsize: u32,
    /// Offset of the path string, relative to the command
    pub name_offset: u32,
    /// Install name recorded in the command
    pub path: String,
}

impl LibraryCommand {
    /// Whether the reference is weak (`LC_LOAD_WEAK_DYLIB`).
    pub fn is_weak(&self) -> bool {
        self.cmd == LC_LOAD_WEAK_DYLIB
    }

    /// Whether this is the library's own identity rather than a dependency.
    pub fn is_id(&self) -> bool {
        self.cmd == LC_ID_DYLIB
    }

    /// Bytes available for the path, terminator included.
    pub fn path_capacity(&self) -> usize {
        (self.cmdsize as usize).saturating_sub(self.name_offset as usize)
    }
}

impl ArchSlice {
    /// Size of this slice's mach header.
    pub fn header_size(&self) -> usize {
        if self.is_64 {
            MACH_HEADER_64_SIZE
        } else {
            MACH_HEADER_SIZE
        }
    }

    /// Slice-relative offset one past the last load command.
    pub fn commands_end(&self) -> usize {
        self.header_size() + self.sizeofcmds as usize
    }

    /// Bytes between the end of the load commands and the first data.
    pub fn free_space(&self) -> usize {
        self.data_start.saturating_sub(self.commands_end())
    }

    /// Find a dependency (not the `LC_ID_DYLIB`) by install name.
    pub fn find_library(&self, path: &str) -> Option<&LibraryCommand> {
        self.libraries.iter().find(|lib| !lib.is_id() && lib.path == path)
    }
}

impl MachOFile {
    /// Open and parse a Mach-O file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        let data = std::fs::read(path)?;
        Self::parse(data)
    }

    /// Parse Mach-O from bytes
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mach = Mach::parse(&data)
            .map_err(|e| Error::BinaryPatchFailed(format!("Failed to parse: {}", e)))?;

        let (is_fat, slices) = match mach {
            Mach::Binary(macho) => {
                let slice = Self::parse_single(&data, &macho, 0, data.len())?;
                (false, vec![slice])
            }
            Mach::Fat(fat) => {
                let mut slices = Vec::new();
                for (i, arch) in fat.iter_arches().enumerate() {
                    let arch = arch
                        .map_err(|e| Error::BinaryPatchFailed(format!("Fat arch {}: {}", i, e)))?;
                    let offset = arch.offset as usize;
                    let size = arch.size as usize;
                    let slice_data = data.get(offset..offset + size).ok_or_else(|| {
                        Error::BinaryPatchFailed(format!("Slice {} exceeds file size", i))
                    })?;

                    let macho = MachO::parse(slice_data, 0)
                        .map_err(|e| Error::BinaryPatchFailed(format!("Slice {}: {}", i, e)))?;

                    slices.push(Self::parse_single(&data, &macho, offset, size)?);
                }
                if slices.is_empty() {
                    return Err(Error::BinaryPatchFailed("Empty FAT binary".into()));
                }
                (true, slices)
            }
        };

        Ok(Self { data, is_fat, slices })
    }

    fn parse_single(
        data: &[u8],
        macho: &MachO,
        base_offset: usize,
        size: usize,
    ) -> Result<ArchSlice> {
        let slice_data = &data[base_offset..base_offset + size];
        let big_endian = !macho.little_endian;
        let is_64 = macho.is_64;

        let mut libraries = Vec::new();
        let mut data_start = size;

        for lc in &macho.load_commands {
            let cmdsize = lc.command.cmdsize() as u32;
            match &lc.command {
                CommandVariant::LoadDylib(dylib)
                | CommandVariant::LoadWeakDylib(dylib)
                | CommandVariant::ReexportDylib(dylib)
                | CommandVariant::LazyLoadDylib(dylib)
                | CommandVariant::LoadUpwardDylib(dylib)
                | CommandVariant::IdDylib(dylib) => {
                    let path = read_command_string(slice_data, lc.offset, cmdsize, dylib.dylib.name)
                        .ok_or_else(|| {
                            Error::BinaryPatchFailed(format!(
                                "Malformed dylib command at offset {:#x}",
                                base_offset + lc.offset
                            ))
                        })?;
                    libraries.push(LibraryCommand {
                        offset: lc.offset,
                        cmd: dylib.cmd,
                        cmdsize,
                        name_offset: dylib.dylib.name,
                        path,
                    });
                }
                CommandVariant::Segment64(seg) => {
                    if seg.fileoff > 0 && seg.filesize > 0 {
                        data_start = data_start.min(seg.fileoff as usize);
                    }
                    let first = first_section_offset(slice_data, lc.offset, seg.nsects, true, big_endian);
                    if let Some(first) = first {
                        data_start = data_start.min(first);
                    }
                }
                CommandVariant::Segment32(seg) => {
                    if seg.fileoff > 0 && seg.filesize > 0 {
                        data_start = data_start.min(seg.fileoff as usize);
                    }
                    let first = first_section_offset(slice_data, lc.offset, seg.nsects, false, big_endian);
                    if let Some(first) = first {
                        data_start = data_start.min(first);
                    }
                }
                _ => {}
            }
        }

        Ok(ArchSlice {
            offset: base_offset,
            size,
            cpu_type: macho.header.cputype as u32,
            is_64,
            big_endian,
            is_executable: macho.header.filetype == MH_EXECUTE,
            ncmds: macho.header.ncmds as u32,
            sizeofcmds: macho.header.sizeofcmds,
            data_start,
            libraries,
        })
    }

    /// Get raw data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the file and return its bytes
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Is FAT binary
    pub fn is_fat(&self) -> bool {
        self.is_fat
    }

    /// Get architecture slices
    pub fn slices(&self) -> &[ArchSlice] {
        &self.slices
    }
}

/// Reads the NUL-terminated path stored inside a load command.
fn read_command_string(
    slice: &[u8],
    lc_offset: usize,
    cmdsize: u32,
    name_offset: u32,
) -> Option<String> {
    let start = lc_offset + name_offset as usize;
    let end = lc_offset + cmdsize as usize;
    let field = slice.get(start..end)?;
    let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    Some(String::from_utf8_lossy(&field[..len]).into_owned())
}

/// Smallest non-zero file offset among a segment's sections.
fn first_section_offset(
    slice: &[u8],
    lc_offset: usize,
    nsects: u32,
    is_64: bool,
    big_endian: bool,
) -> Option<usize> {
    // section_64 is 80 bytes with `offset` at 48, section is 68 with `offset` at 40
    let (header, stride, field) = if is_64 { (72, 80, 48) } else { (56, 68, 40) };
    (0..nsects as usize)
        .filter_map(|i| {
            let at = lc_offset + header + i * stride + field;
            if at + 4 > slice.len() {
                return None;
            }
            match read_u32(slice, at, big_endian) {
                0 => None,
                offset => Some(offset as usize),
            }
        })
        .min()
}

/// Whether the command kind is one the patcher treats as a library reference.
pub fn is_library_command(cmd: u32) -> bool {
    matches!(
        cmd,
        LC_LOAD_DYLIB
            | LC_LOAD_WEAK_DYLIB
            | LC_REEXPORT_DYLIB
            | LC_LAZY_LOAD_DYLIB
            | LC_LOAD_UPWARD_DYLIB
    )
}
