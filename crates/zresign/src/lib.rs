pub mod archive;
pub mod builder;
pub mod bundle;
pub mod catalog;
pub mod error;
pub mod identity;
pub mod ipa;
pub mod macho;
pub mod options;
pub mod pipeline;
pub mod signer;
pub mod tweak;

pub use builder::ZResign;
pub use bundle::{AppBundle, BundleDescriptor, Manifest};
pub use catalog::{Catalog, DirectoryCatalog, IdentityRef, NewSignedApp, SignedAppRecord};
pub use error::Error;
pub use identity::{CertificateRecord, ProvisioningProfile, SigningIdentity};
pub use ipa::{create_ipa, extract_ipa, validate_ipa, CompressionLevel};
pub use macho::{
    insert_library_reference, list_library_references, remove_library_references,
    rewrite_library_path, LibraryReference,
};
pub use options::{Appearance, InjectionRequest, MinimumVersion, Overrides, SigningOptions};
pub use pipeline::{
    CancellationToken, IdleInhibitor, NoopInhibitor, Pipeline, PipelineState, PublishOutcome,
    SigningHandle, SigningRequest,
};
pub use signer::{BundleSigner, SigningJob, ZsignTool};
pub use tweak::{IngestReport, SourceFetcher, SourceKind, TweakInjector, TweakSource};

pub type Result<T> = std::result::Result<T, Error>;
