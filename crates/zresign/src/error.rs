//! Error types for zresign operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure a
//! resign run can surface: archive decoding, tweak ingestion, Mach-O
//! patching, manifest rewriting, identity import, signing and catalog
//! registration.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::path::PathBuf;
use thiserror::Error;

/// Error type for zresign operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Match on variants to render a user-facing message.
///
/// # Examples
///
/// ```no_run
/// use zresign::{archive, Error};
///
/// match archive::extract_package_file("tweak.deb") {
///     Ok(members) => println!("{} members", members.len()),
///     Err(Error::DecompressionFailed(member)) => eprintln!("corrupt member {member}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A package member or tweak source has an extension no codec or
    /// handler is registered for.
    #[error("Unsupported file extension: {0}")]
    UnsupportedFileExtension(String),

    /// A compressed or archived stream could not be decoded.
    ///
    /// Carries the name of the archive member that failed.
    #[error("Decompression failed for {0}")]
    DecompressionFailed(String),

    /// A file the pipeline depends on does not exist.
    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    /// Writing the bundle manifest (or one of its localized variants) failed.
    #[error("Failed to write manifest {}: {source}", .path.display())]
    ManifestWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The PKCS#12 key container could not be imported.
    ///
    /// `code` is the underlying library error code, kept for diagnostics.
    #[error("Failed to import identity (code {code}): {message}")]
    IdentityImportFailed { code: u64, message: String },

    /// The certificate file could not be decoded.
    #[error("Invalid certificate data: {0}")]
    InvalidCertificateData(String),

    /// Invalid or malformed provisioning profile.
    #[error("Invalid provisioning profile: {0}")]
    ProvisioningProfile(String),

    /// A load-command patch could not be applied.
    ///
    /// The executable on disk is left untouched when this is returned.
    #[error("Binary patch failed: {0}")]
    BinaryPatchFailed(String),

    /// The external signing tool reported a failure.
    #[error("Signing tool failed: {0}")]
    SigningToolFailed(String),

    /// The signed bundle was published but could not be recorded.
    #[error("Catalog registration failed: {0}")]
    CatalogRegistrationFailed(String),

    /// A tweak source reference could not be parsed or resolved.
    #[error("Invalid source {0}: {1}")]
    InvalidSource(String, String),

    /// The pipeline builder is missing a required setting.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled between two steps.
    #[error("Run cancelled before {0}")]
    Cancelled(String),

    /// Property list parsing failed.
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    /// ZIP archive operation failed.
    ///
    /// Occurs during IPA extraction or creation. See [`crate::ipa`] module.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Icon image could not be decoded or encoded.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Options or catalog record (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error only affects a single tweak source.
    ///
    /// Ingestion treats these as skips rather than aborting the batch.
    pub fn is_per_source(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedFileExtension(_)
                | Error::DecompressionFailed(_)
                | Error::InvalidSource(..)
                | Error::MissingFile(_)
        )
    }
}
