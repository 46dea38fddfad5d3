//! Synthetic Mach-O images for tests.

use super::parser::LC_LOAD_DYLIB;
use super::writer::{align_to, write_u32};

pub const SYSTEM: &str = "/usr/lib/libSystem.B.dylib";
pub const SUBSTRATE: &str = "/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate";

const MH_MAGIC: u32 = 0xfeedface;
const MH_MAGIC_64: u32 = 0xfeedfacf;
const FAT_MAGIC: u32 = 0xcafebabe;
const MH_EXECUTE: u32 = 0x2;
const LC_SEGMENT: u32 = 0x1;
const LC_SEGMENT_64: u32 = 0x19;
const CPU_TYPE_ARM: u32 = 12;
const CPU_TYPE_ARM64: u32 = 0x0100_000c;

const SLICE_SIZE: usize = 0x2000;
const TEXT_OFFSET: usize = 0x1000;

/// 64-bit executable whose `__text` section starts at 0x1000.
pub fn thin_binary(libs: &[&str]) -> Vec<u8> {
    build_slice(libs, true, None)
}

/// 64-bit executable with exactly `padding` free bytes after its commands.
pub fn thin_binary_with_padding(libs: &[&str], padding: usize) -> Vec<u8> {
    build_slice(libs, true, Some(padding))
}

/// Universal binary with an arm64 slice and an armv7 slice.
pub fn fat_binary(libs: &[&str]) -> Vec<u8> {
    let slices = [build_slice(libs, true, None), build_slice(libs, false, None)];
    let cpu_types = [CPU_TYPE_ARM64, CPU_TYPE_ARM];

    let mut out = vec![0u8; 0x1000];
    write_u32(&mut out, 0, FAT_MAGIC, true);
    write_u32(&mut out, 4, slices.len() as u32, true);
    for (i, slice) in slices.iter().enumerate() {
        let offset = 0x1000 + i * SLICE_SIZE;
        let entry = 8 + i * 20;
        write_u32(&mut out, entry, cpu_types[i], true);
        write_u32(&mut out, entry + 4, 0, true);
        write_u32(&mut out, entry + 8, offset as u32, true);
        write_u32(&mut out, entry + 12, slice.len() as u32, true);
        write_u32(&mut out, entry + 16, 12, true);
    }
    for slice in slices {
        out.extend_from_slice(&slice);
    }
    out
}

fn dylib_command(path: &str, alignment: usize) -> Vec<u8> {
    let size = align_to(24 + path.len() + 1, alignment);
    let mut cmd = vec![0u8; size];
    write_u32(&mut cmd, 0, LC_LOAD_DYLIB, false);
    write_u32(&mut cmd, 4, size as u32, false);
    write_u32(&mut cmd, 8, 24, false);
    write_u32(&mut cmd, 12, 2, false);
    write_u32(&mut cmd, 16, 0x0001_0000, false);
    write_u32(&mut cmd, 20, 0x0001_0000, false);
    cmd[24..24 + path.len()].copy_from_slice(path.as_bytes());
    cmd
}

fn name16(buf: &mut [u8], name: &str) {
    buf[..name.len()].copy_from_slice(name.as_bytes());
}

fn build_slice(libs: &[&str], is_64: bool, padding: Option<usize>) -> Vec<u8> {
    let (header_size, seg_size, sect_size, alignment) = if is_64 {
        (32, 72, 80, 8)
    } else {
        (28, 56, 68, 4)
    };

    let dylibs: Vec<Vec<u8>> = libs.iter().map(|l| dylib_command(l, alignment)).collect();
    let sizeofcmds = seg_size + sect_size + dylibs.iter().map(Vec::len).sum::<usize>();
    let text_offset = match padding {
        Some(padding) => header_size + sizeofcmds + padding,
        None => TEXT_OFFSET,
    };
    let total = SLICE_SIZE.max(text_offset + 0x100);

    let mut out = vec![0u8; total];
    write_u32(&mut out, 0, if is_64 { MH_MAGIC_64 } else { MH_MAGIC }, false);
    write_u32(&mut out, 4, if is_64 { CPU_TYPE_ARM64 } else { CPU_TYPE_ARM }, false);
    write_u32(&mut out, 12, MH_EXECUTE, false);
    write_u32(&mut out, 16, 1 + dylibs.len() as u32, false);
    write_u32(&mut out, 20, sizeofcmds as u32, false);

    // __TEXT segment with a single __text section
    let seg = header_size;
    write_u32(&mut out, seg, if is_64 { LC_SEGMENT_64 } else { LC_SEGMENT }, false);
    write_u32(&mut out, seg + 4, (seg_size + sect_size) as u32, false);
    name16(&mut out[seg + 8..seg + 24], "__TEXT");
    if is_64 {
        // vmaddr, vmsize, fileoff, filesize are u64
        write_u32(&mut out, seg + 32, total as u32, false);
        write_u32(&mut out, seg + 48, total as u32, false);
        write_u32(&mut out, seg + 56, 5, false);
        write_u32(&mut out, seg + 60, 5, false);
        write_u32(&mut out, seg + 64, 1, false);
    } else {
        write_u32(&mut out, seg + 28, total as u32, false);
        write_u32(&mut out, seg + 36, total as u32, false);
        write_u32(&mut out, seg + 40, 5, false);
        write_u32(&mut out, seg + 44, 5, false);
        write_u32(&mut out, seg + 48, 1, false);
    }

    let sect = seg + seg_size;
    name16(&mut out[sect..sect + 16], "__text");
    name16(&mut out[sect + 16..sect + 32], "__TEXT");
    if is_64 {
        write_u32(&mut out, sect + 40, 0x100, false);
        write_u32(&mut out, sect + 48, text_offset as u32, false);
    } else {
        write_u32(&mut out, sect + 36, 0x100, false);
        write_u32(&mut out, sect + 40, text_offset as u32, false);
    }

    let mut at = sect + sect_size;
    for cmd in &dylibs {
        out[at..at + cmd.len()].copy_from_slice(cmd);
        at += cmd.len();
    }

    // Recognisable section payload
    out[text_offset..text_offset + 4].copy_from_slice(&[0x1f, 0x20, 0x03, 0xd5]);
    out
}
