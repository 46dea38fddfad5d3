//! Moving a signed bundle into permanent storage.
//!
//! A publication directory is created with a `.pending` marker, the app is
//! renamed into it, the catalog is told, and only then is the marker removed.
//! A directory that still carries the marker was published but never
//! registered.

use super::context::STAGING_DIR;
use crate::bundle::move_no_clobber;
use crate::catalog::{Catalog, NewSignedApp, SignedAppRecord};
use crate::{Error, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

pub const PENDING_MARKER: &str = ".pending";

/// Result of a successful run.
#[derive(Debug)]
pub struct PublishOutcome {
    /// `<storage>/<uuid>`
    pub storage_path: PathBuf,
    /// The signed `.app` inside `storage_path`
    pub app_path: PathBuf,
    /// Catalog outcome, kept apart because the files are published either way
    pub registration: Result<SignedAppRecord>,
}

impl PublishOutcome {
    pub fn is_registered(&self) -> bool {
        self.registration.is_ok()
    }
}

pub(crate) fn publish(staged_app: &Path, app: NewSignedApp, catalog: &dyn Catalog) -> Result<PublishOutcome> {
    let storage_path = app.storage_path.clone();
    let app_path = storage_path.join(&app.app_name);

    fs::create_dir_all(&storage_path)?;
    let marker = storage_path.join(PENDING_MARKER);
    fs::write(&marker, app.id.to_string())?;

    if !move_no_clobber(staged_app, &app_path)? {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", app_path.display()),
        )));
    }
    info!("Published {}", app_path.display());

    let registration = catalog.create_signed_app_record(app).map_err(|e| match e {
        Error::CatalogRegistrationFailed(_) => e,
        other => Error::CatalogRegistrationFailed(other.to_string()),
    });
    match &registration {
        Ok(record) => {
            if let Err(e) = fs::remove_file(&marker) {
                warn!("Could not remove {}: {}", marker.display(), e);
            }
            info!("Registered {} as {}", record.app.name, record.id());
        }
        Err(e) => warn!("{} left pending: {}", storage_path.display(), e),
    }

    Ok(PublishOutcome {
        storage_path,
        app_path,
        registration,
    })
}

/// Publication directories under `storage_root` still carrying the marker.
pub(crate) fn pending_publications(storage_root: &Path) -> Result<Vec<PathBuf>> {
    if !storage_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut pending: Vec<PathBuf> = fs::read_dir(storage_root)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.file_name().is_some_and(|n| n != STAGING_DIR))
        .filter(|p| p.join(PENDING_MARKER).is_file())
        .collect();
    pending.sort();
    Ok(pending)
}
