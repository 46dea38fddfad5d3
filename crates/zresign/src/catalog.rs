//! Boundary to the persisted catalog of certificates and signed apps.
//!
//! The pipeline only needs three things from the catalog: which identity is
//! current, where that identity's files live, and a place to record a
//! published app. [`DirectoryCatalog`] implements this on a plain directory.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Handle to a certificate known to the catalog.
pub struct IdentityRef {
    pub id: String,
    pub password: SecretString,
}

impl IdentityRef {
    pub fn new(id: impl Into<String>, password: SecretString) -> Self {
        Self {
            id: id.into(),
            password,
        }
    }
}

impl Clone for IdentityRef {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            password: SecretString::new(self.password.expose_secret().clone()),
        }
    }
}

impl fmt::Debug for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRef")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// What the pipeline knows about a freshly published app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSignedApp {
    pub id: Uuid,
    pub storage_path: PathBuf,
    /// File name of the `.app` inside `storage_path`
    pub app_name: String,
    pub bundle_id: String,
    pub name: String,
    pub version: String,
    pub expiration: DateTime<Utc>,
    pub team_name: String,
    pub source_url: Option<String>,
    pub icon: Option<String>,
}

/// A registered signed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAppRecord {
    #[serde(flatten)]
    pub app: NewSignedApp,
    pub registered_at: DateTime<Utc>,
}

impl SignedAppRecord {
    pub fn id(&self) -> Uuid {
        self.app.id
    }
}

/// Persisted store of certificates and signed apps.
pub trait Catalog: Send + Sync {
    fn create_signed_app_record(&self, app: NewSignedApp) -> Result<SignedAppRecord>;

    fn current_signing_identity(&self) -> Option<IdentityRef>;

    /// `(profile, key_container)` for `identity`.
    fn certificate_paths(&self, identity: &IdentityRef) -> Result<(PathBuf, PathBuf)>;
}

/// Catalog kept in a directory:
///
/// ```text
/// <root>/certificates/<id>/*.mobileprovision
/// <root>/certificates/<id>/*.p12
/// <root>/certificates/<id>/password   (optional)
/// <root>/certificates/current         (id of the current certificate)
/// <root>/signed.json
/// ```
pub struct DirectoryCatalog {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn certificates_dir(&self) -> PathBuf {
        self.root.join("certificates")
    }

    fn records_path(&self) -> PathBuf {
        self.root.join("signed.json")
    }

    /// All registered apps, oldest first.
    pub fn signed_apps(&self) -> Result<Vec<SignedAppRecord>> {
        let path = self.records_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Copies a profile and key container in as certificate `id`.
    pub fn import_certificate(
        &self,
        id: &str,
        profile: impl AsRef<Path>,
        key_container: impl AsRef<Path>,
        password: Option<&SecretString>,
        make_current: bool,
    ) -> Result<()> {
        for source in [profile.as_ref(), key_container.as_ref()] {
            if !source.is_file() {
                return Err(Error::MissingFile(source.to_path_buf()));
            }
        }
        let dir = self.certificates_dir().join(id);
        fs::create_dir_all(&dir)?;
        fs::copy(profile.as_ref(), dir.join("embedded.mobileprovision"))?;
        fs::copy(key_container.as_ref(), dir.join("identity.p12"))?;
        if let Some(password) = password {
            fs::write(dir.join("password"), password.expose_secret())?;
        }
        if make_current {
            fs::write(self.certificates_dir().join("current"), id)?;
        }
        Ok(())
    }

    /// Certificate `id` with its stored password, if it exists.
    pub fn identity(&self, id: &str) -> Option<IdentityRef> {
        let dir = self.certificates_dir().join(id);
        if id.is_empty() || !dir.is_dir() {
            return None;
        }
        let password = fs::read_to_string(dir.join("password"))
            .map(|p| p.trim_end_matches(['\r', '\n']).to_string())
            .unwrap_or_default();
        Some(IdentityRef::new(id, SecretString::new(password)))
    }

    fn find_with_extension(dir: &Path, ext: &str) -> Result<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
            .collect();
        found.sort();
        found
            .into_iter()
            .next()
            .ok_or_else(|| Error::MissingFile(dir.join(format!("*.{}", ext))))
    }
}

impl Catalog for DirectoryCatalog {
    fn create_signed_app_record(&self, app: NewSignedApp) -> Result<SignedAppRecord> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::CatalogRegistrationFailed("catalog lock poisoned".into()))?;

        let fail = |e: Error| Error::CatalogRegistrationFailed(e.to_string());
        let mut records = self.signed_apps().map_err(fail)?;
        let record = SignedAppRecord {
            app,
            registered_at: Utc::now(),
        };
        records.push(record.clone());

        let json = serde_json::to_vec_pretty(&records).map_err(|e| fail(e.into()))?;
        fs::create_dir_all(&self.root).map_err(|e| fail(e.into()))?;
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| fail(e.into()))?;
        tmp.write_all(&json).map_err(|e| fail(e.into()))?;
        tmp.persist(self.records_path())
            .map_err(|e| fail(e.error.into()))?;

        debug!("Registered {} ({})", record.app.name, record.id());
        Ok(record)
    }

    fn current_signing_identity(&self) -> Option<IdentityRef> {
        let id = fs::read_to_string(self.certificates_dir().join("current")).ok()?;
        self.identity(id.trim())
    }

    fn certificate_paths(&self, identity: &IdentityRef) -> Result<(PathBuf, PathBuf)> {
        let dir = self.certificates_dir().join(&identity.id);
        if !dir.is_dir() {
            return Err(Error::MissingFile(dir));
        }
        Ok((
            Self::find_with_extension(&dir, "mobileprovision")?,
            Self::find_with_extension(&dir, "p12")?,
        ))
    }
}
