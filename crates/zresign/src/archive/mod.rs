//! Package (`.deb`) extraction.
//!
//! A package is an `ar` archive whose `data.tar.*` member holds the payload
//! tree. Extraction is two-staged: the `ar` layer is read into memory, then
//! each payload member is decoded and un-tarred onto disk.

mod codec;

pub use codec::{decompress_tar_stream, Codec};

use crate::{Error, Result};
use log::{debug, warn};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Name reported when the `ar` layer itself cannot be read.
const ARCHIVE_LABEL: &str = "<archive>";

/// Payload members, in the order they are tried.
const PAYLOAD_MEMBERS: [&str; 4] = ["data.tar.lzma", "data.tar.gz", "data.tar.xz", "data.tar.bz2"];

/// One member of an `ar` archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArMember {
    pub name: String,
    pub content: Vec<u8>,
}

impl ArMember {
    /// Whether this member is a compressed payload tarball.
    pub fn is_payload(&self) -> bool {
        PAYLOAD_MEMBERS.contains(&self.name.as_str())
    }

    /// Directory the payload unpacks into, e.g. `data` for `data.tar.gz`.
    fn payload_dir_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

/// Splits an in-memory `ar` archive into its members, in archive order.
pub fn extract_package_archive(bytes: &[u8]) -> Result<Vec<ArMember>> {
    let corrupt = |e: std::io::Error| {
        debug!("ar archive: {}", e);
        Error::DecompressionFailed(ARCHIVE_LABEL.to_string())
    };

    let mut archive = ar::Archive::new(bytes);
    let mut members = Vec::new();
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(corrupt)?;
        let name = String::from_utf8_lossy(entry.header().identifier())
            .trim_end_matches('/')
            .to_string();
        let declared = entry.header().size();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(corrupt)?;
        if content.len() as u64 != declared {
            debug!("ar member {}: {} of {} bytes present", name, content.len(), declared);
            return Err(Error::DecompressionFailed(ARCHIVE_LABEL.to_string()));
        }
        members.push(ArMember { name, content });
    }
    Ok(members)
}

/// Memory-maps `path` and splits it into members.
pub fn extract_package_file(path: impl AsRef<Path>) -> Result<Vec<ArMember>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    let file = File::open(path)?;
    // SAFETY: the package is a private copy in the scratch directory
    let mmap = unsafe { Mmap::map(&file)? };
    extract_package_archive(&mmap[..])
}

/// Writes every member of the package at `path` under `dest` and unpacks
/// each payload member into `dest/<stem>/`.
///
/// Returns the payload roots, which are what the tweak scanner walks.
pub fn unpack_package(path: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;

    let members = extract_package_file(path)?;
    let mut roots = Vec::new();
    for member in &members {
        if member.name.is_empty() || member.name.contains('/') || member.name.starts_with('.') {
            warn!("{}: ignoring member with unusable name {:?}", path.display(), member.name);
            continue;
        }
        fs::write(dest.join(&member.name), &member.content)?;

        if member.is_payload() {
            let root = dest.join(member.payload_dir_name());
            let entries = decompress_tar_stream(&member.name, &member.content, &root)?;
            debug!("{}: {} entries from {}", path.display(), entries, member.name);
            roots.push(root);
        }
    }

    if roots.is_empty() {
        warn!("{} has no data.tar payload", path.display());
    }
    Ok(roots)
}


#[cfg(test)]
mod tests {
    use super::testutil::deb_with;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_members_in_archive_order() {
        let deb = deb_with(&[("Library/Frameworks/A.framework/A", b"a")]);
        let members = extract_package_archive(&deb).unwrap();
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["debian-binary", "control.tar.gz", "data.tar.gz"]);
        assert_eq!(members[0].content, b"2.0\n");
        assert!(members[2].is_payload());
        assert!(!members[1].is_payload());
    }

    #[test]
    fn test_two_byte_archive_is_corrupt() {
        let err = extract_package_archive(b"!<").unwrap_err();
        match err {
            Error::DecompressionFailed(name) => assert_eq!(name, ARCHIVE_LABEL),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_oversized_member_is_corrupt() {
        let mut bytes = b"!<arch>\n".to_vec();
        let header = format!("{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n", "data.tar.gz", 0, 0, 0, 644, 9_999_999_999u64);
        assert_eq!(header.len(), 60);
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(b"xx");

        let err = extract_package_archive(&bytes).unwrap_err();
        assert!(matches!(err, Error::DecompressionFailed(ref name) if name == ARCHIVE_LABEL));
    }

    #[test]
    fn test_unpack_package_returns_payload_root() {
        let temp_dir = TempDir::new().unwrap();
        let deb = temp_dir.path().join("tweak.deb");
        fs::write(&deb, deb_with(&[("Library/MobileSubstrate/DynamicLibraries/T.dylib", b"t")]))
            .unwrap();

        let out = temp_dir.path().join("out");
        let roots = unpack_package(&deb, &out).unwrap();
        assert_eq!(roots, vec![out.join("data")]);
        assert!(out.join("debian-binary").is_file());
        assert_eq!(
            fs::read(out.join("data/Library/MobileSubstrate/DynamicLibraries/T.dylib")).unwrap(),
            b"t"
        );
    }

    #[test]
    fn test_missing_package() {
        let err = extract_package_file("/nonexistent/tweak.deb").unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }
}
