//! ZResign builder API
//!
//! Assembles a [`Pipeline`] from its collaborators: where signed apps are
//! stored, the catalog they are registered with and the signing primitive.

use crate::catalog::Catalog;
use crate::pipeline::{IdleInhibitor, NoopInhibitor, Pipeline, PipelineState, StateObserver};
use crate::signer::{BundleSigner, ZsignTool};
use crate::tweak::SourceFetcher;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resign pipeline configuration with builder pattern API.
///
/// # Example
///
/// ```ignore
/// use zresign::{DirectoryCatalog, SigningRequest, ZResign};
///
/// let catalog = DirectoryCatalog::new("/var/lib/zresign/catalog");
/// let identity = catalog.current_signing_identity().expect("no certificate");
/// let pipeline = ZResign::new()
///     .storage_root("/var/lib/zresign/apps")
///     .catalog(catalog)
///     .shim_package("/usr/share/zresign/ellekit.deb")
///     .build()?;
///
/// let outcome = pipeline.run(SigningRequest::new("App.ipa", identity))?;
/// ```
#[derive(Clone)]
pub struct ZResign {
    storage_root: Option<PathBuf>,
    catalog: Option<Arc<dyn Catalog>>,
    signer: Arc<dyn BundleSigner>,
    shim_package: Option<PathBuf>,
    fetcher: Option<Arc<dyn SourceFetcher>>,
    inhibitor: Arc<dyn IdleInhibitor>,
    observer: Option<StateObserver>,
}

impl ZResign {
    /// Create a new builder that signs with `zsign` from `PATH`.
    pub fn new() -> Self {
        Self {
            storage_root: None,
            catalog: None,
            signer: Arc::new(ZsignTool::default()),
            shim_package: None,
            fetcher: None,
            inhibitor: Arc::new(NoopInhibitor),
            observer: None,
        }
    }

    /// Set the directory signed apps are published into.
    ///
    /// Staging directories are created under `<root>/.staging`, so moving a
    /// finished app into place is a rename.
    pub fn storage_root(mut self, path: impl AsRef<Path>) -> Self {
        self.storage_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the catalog identities are looked up in and results recorded to.
    pub fn catalog(mut self, catalog: impl Catalog + 'static) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    /// Share an existing catalog with the pipeline.
    pub fn shared_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replace the signing primitive.
    pub fn signer(mut self, signer: impl BundleSigner + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    /// Use a `zsign` executable at `program`.
    pub fn zsign(self, program: impl AsRef<Path>) -> Self {
        self.signer(ZsignTool::new(program.as_ref()))
    }

    /// Set the package installed when an app lacks a substrate framework.
    pub fn shim_package(mut self, path: impl AsRef<Path>) -> Self {
        self.shim_package = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the downloader for remote tweak sources.
    pub fn fetcher(mut self, fetcher: impl SourceFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Set what keeps the host awake during a run.
    pub fn inhibitor(mut self, inhibitor: impl IdleInhibitor + 'static) -> Self {
        self.inhibitor = Arc::new(inhibitor);
        self
    }

    /// Be told of every state a run enters.
    pub fn observer(mut self, observer: impl Fn(&PipelineState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if:
    /// - No storage root is set
    /// - No catalog is set
    /// - The shim package does not exist
    pub fn validate(&self) -> Result<()> {
        if self.storage_root.is_none() {
            return Err(Error::Config("Must specify a storage root".into()));
        }
        if self.catalog.is_none() {
            return Err(Error::Config("Must specify a catalog".into()));
        }
        if let Some(shim) = &self.shim_package {
            if !shim.is_file() {
                return Err(Error::MissingFile(shim.clone()));
            }
        }
        Ok(())
    }

    /// Build the pipeline.
    pub fn build(self) -> Result<Pipeline> {
        self.validate()?;
        let (Some(storage_root), Some(catalog)) = (self.storage_root, self.catalog) else {
            return Err(Error::Config("Incomplete configuration".into()));
        };
        std::fs::create_dir_all(&storage_root)?;

        Ok(Pipeline {
            storage_root,
            catalog,
            signer: self.signer,
            shim_package: self.shim_package,
            fetcher: self.fetcher,
            inhibitor: self.inhibitor,
            observer: self.observer,
        })
    }
}

impl Default for ZResign {
    fn default() -> Self {
        Self::new()
    }
}
