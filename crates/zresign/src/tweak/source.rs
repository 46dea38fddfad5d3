//! Tweak source references.

use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// What a source turns out to be once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A single `.dylib`
    StandaloneLibrary,
    /// A `.deb` package
    PackageArchive,
    /// A `.framework` directory
    Framework,
    /// A `.bundle` resource directory
    Bundle,
    Unsupported,
}

impl SourceKind {
    /// Classifies by file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "dylib" => SourceKind::StandaloneLibrary,
            "deb" => SourceKind::PackageArchive,
            "framework" => SourceKind::Framework,
            "bundle" => SourceKind::Bundle,
            _ => SourceKind::Unsupported,
        }
    }
}

/// Where a source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(Url),
}

/// A parsed source reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TweakSource {
    raw: String,
    location: SourceLocation,
}

impl TweakSource {
    /// Accepts plain paths, `file://` URLs and `http(s)://` URLs.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidSource(raw.to_string(), "empty reference".into()));
        }

        let location = if trimmed.contains("://") {
            let url = Url::parse(trimmed)
                .map_err(|e| Error::InvalidSource(raw.to_string(), e.to_string()))?;
            match url.scheme() {
                "file" => SourceLocation::Local(url.to_file_path().map_err(|_| {
                    Error::InvalidSource(raw.to_string(), "not a local file URL".into())
                })?),
                "http" | "https" => SourceLocation::Remote(url),
                other => {
                    return Err(Error::InvalidSource(
                        raw.to_string(),
                        format!("unsupported scheme {}", other),
                    ))
                }
            }
        } else {
            SourceLocation::Local(PathBuf::from(trimmed))
        };

        Ok(Self {
            raw: raw.to_string(),
            location,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Last path component, used to name the installed file.
    pub fn file_name(&self) -> Option<String> {
        match &self.location {
            SourceLocation::Local(path) => {
                path.file_name().map(|n| n.to_string_lossy().into_owned())
            }
            SourceLocation::Remote(url) => url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.file_name()
            .map(|n| SourceKind::from_path(Path::new(&n)))
            .unwrap_or(SourceKind::Unsupported)
    }

    /// Identity used to detect the same source listed twice.
    pub fn dedup_key(&self) -> String {
        match &self.location {
            SourceLocation::Local(path) => std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .to_string_lossy()
                .into_owned(),
            SourceLocation::Remote(url) => url.to_string(),
        }
    }
}

impl fmt::Display for TweakSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Downloads remote sources.
pub trait SourceFetcher: Send + Sync {
    /// Fetches `url` into `dest_dir` and returns the local file.
    fn fetch(&self, url: &Url, dest_dir: &Path) -> Result<PathBuf>;
}
