//! Compression codecs for package payloads.
//!
//! A codec is chosen from the member's declared name only; the bytes are
//! never sniffed.

use crate::{Error, Result};
use log::debug;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Codec wrapping the tar layer of a package payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Xz,
    Bzip2,
    /// Legacy `.lzma` (LZMA alone) streams
    Lzma,
}

impl Codec {
    /// Picks the codec for an archive member by its extension.
    pub fn from_member_name(name: &str) -> Result<Self> {
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gz" => Ok(Codec::Gzip),
            "xz" => Ok(Codec::Xz),
            "bz2" => Ok(Codec::Bzip2),
            "lzma" => Ok(Codec::Lzma),
            _ => Err(Error::UnsupportedFileExtension(name.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
            Codec::Xz => "xz",
            Codec::Bzip2 => "bz2",
            Codec::Lzma => "lzma",
        }
    }

    /// Wraps `reader` in the matching streaming decoder.
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Codec::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Codec::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Codec::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Codec::Lzma => {
                let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)?;
                Box::new(xz2::read::XzDecoder::new_stream(reader, stream))
            }
        })
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Decodes a compressed tar stream and unpacks it under `dest`.
///
/// Returns the number of tar entries written. A corrupt codec stream, a
/// corrupt tar, or a stream holding no tar entries at all fails with
/// [`Error::DecompressionFailed`] naming `member`.
pub fn decompress_tar_stream(member: &str, data: &[u8], dest: &Path) -> Result<usize> {
    let codec = Codec::from_member_name(member)?;
    let failed = |e: io::Error| {
        debug!("{} ({}): {}", member, codec, e);
        Error::DecompressionFailed(member.to_string())
    };

    std::fs::create_dir_all(dest)?;
    let decoder = codec.decoder(data).map_err(failed)?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);

    let mut count = 0;
    for entry in archive.entries().map_err(failed)? {
        let mut entry = entry.map_err(failed)?;
        // unpack_in refuses paths that would land outside dest
        if !entry.unpack_in(dest).map_err(failed)? {
            debug!("{}: skipped entry escaping {}", member, dest.display());
        }
        count += 1;
    }

    if count == 0 {
        debug!("{} decoded to an empty tar stream", member);
        return Err(Error::DecompressionFailed(member.to_string()));
    }
    Ok(count)
}
