//! Signing identity resolution.
//!
//! Loads the PKCS#12 key container and provisioning profile behind a
//! certificate, checks that they belong together and exposes the metadata
//! the pipeline needs (team name, expiration, trust-check flag).

pub mod profile;

pub use profile::ProvisioningProfile;

use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Certificate and private key, decrypted in memory only.
#[derive(Clone)]
pub struct SigningIdentity {
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &common_name(&self.certificate))
            .finish_non_exhaustive()
    }
}

impl SigningIdentity {
    /// Fails unless the private key matches the certificate's public key.
    pub fn validate_key_pair(&self) -> Result<()> {
        let public = self
            .certificate
            .public_key()
            .map_err(|e| Error::InvalidCertificateData(format!("No public key: {}", e)))?;
        if !self.private_key.public_eq(&public) {
            return Err(Error::InvalidCertificateData(
                "Private key does not match certificate public key".into(),
            ));
        }
        Ok(())
    }

    /// The certificate's `notAfter`.
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        asn1_to_chrono(self.certificate.not_after())
    }
}

/// Loads a certificate from PEM or DER.
pub fn load_certificate(path: impl AsRef<Path>) -> Result<X509> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    let data = fs::read(path)?;
    X509::from_pem(&data)
        .or_else(|_| X509::from_der(&data))
        .map_err(|e| Error::InvalidCertificateData(format!("{}: {}", path.display(), e)))
}

/// Imports a PKCS#12 container.
///
/// Failures carry the code of the first OpenSSL error so callers can tell a
/// wrong password from a corrupt file.
pub fn load_identity(path: impl AsRef<Path>, password: &SecretString) -> Result<SigningIdentity> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::MissingFile(path.to_path_buf()));
    }
    let data = fs::read(path)?;

    let parsed = Pkcs12::from_der(&data)
        .and_then(|p12| p12.parse2(password.expose_secret()))
        .map_err(import_failed)?;

    let certificate = parsed.cert.ok_or_else(|| Error::IdentityImportFailed {
        code: 0,
        message: "No certificate in PKCS#12".into(),
    })?;
    let private_key = parsed.pkey.ok_or_else(|| Error::IdentityImportFailed {
        code: 0,
        message: "No private key in PKCS#12".into(),
    })?;

    let identity = SigningIdentity {
        certificate,
        private_key,
    };
    identity.validate_key_pair()?;
    Ok(identity)
}

fn import_failed(stack: ErrorStack) -> Error {
    let code = stack.errors().first().map(|e| e.code() as u64).unwrap_or(0);
    Error::IdentityImportFailed {
        code,
        message: stack.to_string(),
    }
}

/// Everything known about one signing certificate.
pub struct CertificateRecord {
    pub team_name: String,
    pub expiration: DateTime<Utc>,
    /// Trust-check flag from the profile
    pub ppq_check: bool,
    pub password: SecretString,
    pub profile_path: PathBuf,
    pub key_container_path: PathBuf,
    pub profile: ProvisioningProfile,
    pub identity: SigningIdentity,
}

impl fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("team_name", &self.team_name)
            .field("expiration", &self.expiration)
            .field("ppq_check", &self.ppq_check)
            .field("profile_path", &self.profile_path)
            .field("key_container_path", &self.key_container_path)
            .finish_non_exhaustive()
    }
}

impl CertificateRecord {
    /// Reads the profile and key container and pairs their metadata.
    ///
    /// Team name and expiration come from the profile; expiration falls back
    /// to the certificate's `notAfter`.
    pub fn resolve(
        profile_path: impl AsRef<Path>,
        key_container_path: impl AsRef<Path>,
        password: SecretString,
    ) -> Result<Self> {
        let profile_path = profile_path.as_ref().to_path_buf();
        let key_container_path = key_container_path.as_ref().to_path_buf();

        let profile = ProvisioningProfile::from_file(&profile_path)?;
        let identity = load_identity(&key_container_path, &password)?;

        let expiration = match profile.expiration {
            Some(date) => date,
            None => identity.not_after()?,
        };
        let team_name = if profile.team_name.is_empty() {
            common_name(&identity.certificate).unwrap_or_default()
        } else {
            profile.team_name.clone()
        };

        let record = Self {
            team_name,
            expiration,
            ppq_check: profile.ppq_check,
            password,
            profile_path,
            key_container_path,
            profile,
            identity,
        };
        if record.is_expired(Utc::now()) {
            warn!(
                "Certificate for {} expired on {}; signing will likely fail",
                record.team_name, record.expiration
            );
        }
        Ok(record)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

fn common_name(cert: &X509) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string())
}

fn asn1_to_chrono(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)
        .map_err(|e| Error::InvalidCertificateData(e.to_string()))?;
    let diff = epoch
        .diff(time)
        .map_err(|e| Error::InvalidCertificateData(e.to_string()))?;
    let secs = diff.days as i64 * 86_400 + diff.secs as i64;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| Error::InvalidCertificateData(format!("Invalid notAfter: {}", time)))
}
