//! IPA container handling.
//!
//! The pipeline stages `.ipa` inputs with [`extract_ipa`]; the CLI can pack a
//! published bundle back up with [`create_ipa`].

pub mod archive;
pub mod extract;

pub use archive::{create_ipa, CompressionLevel};
pub use extract::{extract_ipa, find_app_bundle, validate_ipa};
