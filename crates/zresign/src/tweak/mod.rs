//! Tweak ingestion.
//!
//! Resolves tweak sources, unpacks packages, installs the libraries,
//! frameworks and resource bundles they carry into an app bundle and links
//! each installed library from the host executable with a weak load command.
//!
//! Sources are processed strictly in the order given. A package is scanned
//! right after it is unpacked, so everything an earlier source installs is in
//! place before a later source is looked at. When the bundle lacks a
//! substrate framework the configured shim package is processed first.
//!
//! Problems confined to one source (unreadable package, unsupported
//! extension, unparsable tweak binary) are recorded as skips. Failing to
//! patch the host executable aborts the whole ingestion.

pub mod source;
pub mod substrate;

pub use source::{SourceFetcher, SourceKind, SourceLocation, TweakSource};
pub use substrate::{scan_payload, PayloadItem};

use crate::archive::unpack_package;
use crate::bundle::{copy_tree, move_no_clobber, AppBundle};
use crate::macho::{insert_library_reference, rewrite_library_path};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Install name tweaks are built against.
pub const SUBSTRATE_INSTALL_NAME: &str =
    "/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate";
/// Install name of the substrate framework once bundled with the app.
pub const SUBSTRATE_RPATH_NAME: &str = "@rpath/CydiaSubstrate.framework/CydiaSubstrate";

const SUBSTRATE_FRAMEWORK: &str = "CydiaSubstrate.framework";

/// A source or item that was not installed, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub source: String,
    pub reason: String,
}

/// Outcome of one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Destinations inside the bundle, in installation order
    pub installed: Vec<PathBuf>,
    /// Load paths added to the host executable
    pub injected: Vec<String>,
    pub skipped: Vec<Skip>,
}

impl IngestReport {
    fn skip(&mut self, source: impl Into<String>, reason: impl Into<String>) {
        let skip = Skip {
            source: source.into(),
            reason: reason.into(),
        };
        warn!("Skipping {}: {}", skip.source, skip.reason);
        self.skipped.push(skip);
    }
}

/// Installs tweak sources into one bundle.
pub struct TweakInjector<'a> {
    bundle: &'a AppBundle,
    shim_package: Option<&'a Path>,
    fetcher: Option<&'a dyn SourceFetcher>,
}

impl<'a> TweakInjector<'a> {
    pub fn new(bundle: &'a AppBundle) -> Self {
        Self {
            bundle,
            shim_package: None,
            fetcher: None,
        }
    }

    /// Package providing the substrate framework when the bundle has none.
    pub fn shim_package(mut self, path: Option<&'a Path>) -> Self {
        self.shim_package = path;
        self
    }

    /// Downloader for `http(s)` sources. Without one they are skipped.
    pub fn fetcher(mut self, fetcher: Option<&'a dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Ingests `sources` in order.
    pub fn run(&self, sources: &[String]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        if sources.is_empty() {
            return Ok(report);
        }

        let frameworks = self.bundle.frameworks_dir();
        let mut queue: Vec<String> = Vec::with_capacity(sources.len() + 1);
        if !frameworks.join(SUBSTRATE_FRAMEWORK).exists() {
            match self.shim_package {
                Some(shim) => {
                    debug!("{} has no substrate, adding {}", self.bundle.path().display(), shim.display());
                    queue.push(shim.to_string_lossy().into_owned());
                }
                None => {
                    error!(
                        "{} has no {} and no shim package is configured; tweaks not injected",
                        self.bundle.path().display(),
                        SUBSTRATE_FRAMEWORK
                    );
                    for source in sources {
                        report.skip(source.clone(), "substrate framework unavailable");
                    }
                    return Ok(report);
                }
            }
        }
        queue.extend(sources.iter().cloned());

        fs::create_dir_all(&frameworks)?;
        let scratch = self.scratch_dir()?;
        let mut seen = HashSet::new();

        for (index, raw) in queue.iter().enumerate() {
            let source = match TweakSource::parse(raw) {
                Ok(source) => source,
                Err(e) => {
                    report.skip(raw.clone(), e.to_string());
                    continue;
                }
            };
            if !seen.insert(source.dedup_key()) {
                report.skip(raw.clone(), "duplicate source");
                continue;
            }

            let work = scratch.path().join(index.to_string());
            match self.ingest_source(&source, &work, &mut report) {
                Ok(()) => {}
                Err(e) if e.is_per_source() => report.skip(raw.clone(), e.to_string()),
                Err(e) => return Err(e),
            }
        }

        info!(
            "{}: {} installed, {} injected, {} skipped",
            self.bundle.path().display(),
            report.installed.len(),
            report.injected.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Scratch space on the same filesystem as the bundle so moves are renames.
    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".tweaks-");
        match self.bundle.path().parent() {
            Some(parent) => Ok(builder.tempdir_in(parent)?),
            None => Ok(builder.tempdir()?),
        }
    }

    fn ingest_source(&self, source: &TweakSource, work: &Path, report: &mut IngestReport) -> Result<()> {
        fs::create_dir_all(work)?;
        let local = self.stage_source(source, work)?;

        match SourceKind::from_path(&local) {
            SourceKind::PackageArchive => {
                let roots = unpack_package(&local, work.join("unpacked"))?;
                for root in roots {
                    for item in scan_payload(&root)? {
                        self.install_item(&item.path, item.kind, source.raw(), report)?;
                    }
                }
            }
            SourceKind::Unsupported => {
                return Err(Error::UnsupportedFileExtension(
                    local
                        .extension()
                        .map(|e| e.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                ));
            }
            kind => self.install_item(&local, kind, source.raw(), report)?,
        }
        Ok(())
    }

    /// Copies or downloads a source into `work` so the original is never moved.
    fn stage_source(&self, source: &TweakSource, work: &Path) -> Result<PathBuf> {
        match source.location() {
            SourceLocation::Local(path) => {
                if path.symlink_metadata().is_err() {
                    return Err(Error::MissingFile(path.clone()));
                }
                let name = source
                    .file_name()
                    .ok_or_else(|| Error::InvalidSource(source.raw().into(), "no file name".into()))?;
                let staged = work.join(name);
                if path.is_dir() {
                    copy_tree(path, &staged)?;
                } else {
                    fs::copy(path, &staged)?;
                }
                Ok(staged)
            }
            SourceLocation::Remote(url) => match self.fetcher {
                Some(fetcher) => fetcher.fetch(url, work),
                None => Err(Error::InvalidSource(
                    source.raw().into(),
                    "remote sources need a fetcher".into(),
                )),
            },
        }
    }

    fn install_item(
        &self,
        path: &Path,
        kind: SourceKind,
        origin: &str,
        report: &mut IngestReport,
    ) -> Result<()> {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => {
                report.skip(origin, format!("{} has no file name", path.display()));
                return Ok(());
            }
        };

        match kind {
            SourceKind::StandaloneLibrary => {
                if let Err(e) = rewrite_library_path(path, SUBSTRATE_INSTALL_NAME, SUBSTRATE_RPATH_NAME) {
                    report.skip(origin, format!("{}: {}", name, e));
                    return Ok(());
                }
                let dest = self.bundle.frameworks_dir().join(&name);
                if !self.place(path, &dest, origin, report)? {
                    return Ok(());
                }
                self.link(&format!("@executable_path/Frameworks/{}", name), origin, report)
            }
            SourceKind::Framework => {
                let executable = AppBundle::new(path).find_executable();
                if let Some(exe) = &executable {
                    if let Err(e) = rewrite_library_path(exe, SUBSTRATE_INSTALL_NAME, SUBSTRATE_RPATH_NAME) {
                        report.skip(origin, format!("{}: {}", name, e));
                        return Ok(());
                    }
                }
                let dest = self.bundle.frameworks_dir().join(&name);
                if !self.place(path, &dest, origin, report)? {
                    return Ok(());
                }
                match executable.as_deref().and_then(Path::file_name) {
                    Some(exe) => self.link(
                        &format!("@executable_path/Frameworks/{}/{}", name, exe.to_string_lossy()),
                        origin,
                        report,
                    ),
                    None => {
                        debug!("{} has no executable, installed without linking", name);
                        Ok(())
                    }
                }
            }
            SourceKind::Bundle => {
                self.place(path, &self.bundle.path().join(&name), origin, report)?;
                Ok(())
            }
            SourceKind::PackageArchive | SourceKind::Unsupported => {
                report.skip(origin, format!("{} cannot be installed directly", name));
                Ok(())
            }
        }
    }

    /// Moves an item into the bundle, recording a skip if the name is taken.
    fn place(&self, src: &Path, dest: &Path, origin: &str, report: &mut IngestReport) -> Result<bool> {
        if move_no_clobber(src, dest)? {
            debug!("Installed {}", dest.display());
            report.installed.push(dest.to_path_buf());
            Ok(true)
        } else {
            report.skip(origin, format!("{} already exists", dest.display()));
            Ok(false)
        }
    }

    fn link(&self, load_path: &str, origin: &str, report: &mut IngestReport) -> Result<()> {
        let Some(host) = self.bundle.find_executable() else {
            report.skip(origin, format!("host executable missing, {} not linked", load_path));
            return Ok(());
        };
        insert_library_reference(&host, load_path, true)?;
        report.injected.push(load_path.to_string());
        Ok(())
    }
}
