//! Per-run configuration.
//!
//! [`SigningOptions`] is a flat set of independent toggles, deserializable
//! from JSON so the CLI can take it from a file. [`InjectionRequest`] and
//! [`Overrides`] carry the per-call inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `MinimumOSVersion` handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MinimumVersion {
    /// Leave the manifest value alone.
    #[default]
    Automatic,
    /// Force a dotted version such as `"14.0"`.
    Version(String),
}

impl From<String> for MinimumVersion {
    fn from(value: String) -> Self {
        if value.is_empty() || value.eq_ignore_ascii_case("automatic") {
            MinimumVersion::Automatic
        } else {
            MinimumVersion::Version(value)
        }
    }
}

impl From<MinimumVersion> for String {
    fn from(value: MinimumVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MinimumVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MinimumVersion::Automatic => f.write_str("Automatic"),
            MinimumVersion::Version(v) => f.write_str(v),
        }
    }
}

/// `UIUserInterfaceStyle` handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Appearance {
    #[default]
    Automatic,
    Light,
    Dark,
}

impl Appearance {
    /// Manifest value to force, if any.
    pub fn style(&self) -> Option<&'static str> {
        match self {
            Appearance::Automatic => None,
            Appearance::Light => Some("Light"),
            Appearance::Dark => Some("Dark"),
        }
    }
}

/// Toggles applied to every bundle in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningOptions {
    /// Sets `UISupportsDocumentBrowser`
    pub force_file_sharing: bool,
    /// Sets `UIFileSharingEnabled`
    pub force_itunes_file_sharing: bool,
    /// Removes `UISupportedDevices`
    pub remove_supported_devices: bool,
    /// Removes `CFBundleURLTypes`
    pub remove_url_scheme: bool,
    /// Sets `CADisableMinimumFrameDurationOnPhone`
    pub force_pro_motion: bool,
    /// Sets `GCSupportsGameMode`
    pub force_game_mode: bool,
    /// Sets `UIRequiresFullScreen`
    pub force_full_screen: bool,
    pub force_minimum_version: MinimumVersion,
    pub force_appearance: Appearance,
    /// Rewrite `*.lproj/InfoPlist.strings` when the display name changes
    pub force_localize: bool,
    /// Suffix the bundle id when the identity is subject to the trust check
    pub ppq_protection: bool,
    /// Suffix used by `ppq_protection`; a random one is generated when empty
    pub ppq_suffix: String,
    /// Original bundle id -> replacement
    pub bundle_id_overrides: BTreeMap<String, String>,
    /// Original display name -> replacement
    pub display_name_overrides: BTreeMap<String, String>,
    /// Apply edits and injection to `PlugIns/*.appex` too
    pub include_extensions: bool,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            force_file_sharing: false,
            force_itunes_file_sharing: false,
            remove_supported_devices: false,
            remove_url_scheme: false,
            force_pro_motion: false,
            force_game_mode: false,
            force_full_screen: false,
            force_minimum_version: MinimumVersion::Automatic,
            force_appearance: Appearance::Automatic,
            force_localize: false,
            ppq_protection: false,
            ppq_suffix: String::new(),
            bundle_id_overrides: BTreeMap::new(),
            display_name_overrides: BTreeMap::new(),
            include_extensions: true,
        }
    }
}

impl SigningOptions {
    /// Parses options from JSON; absent keys take their defaults.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Libraries to add and remove in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionRequest {
    /// Local paths, `file://` URLs or remote URLs, processed in order
    pub sources: Vec<String>,
    /// Install names to drop from the host executable
    pub remove: Vec<String>,
}

impl InjectionRequest {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.remove.is_empty()
    }
}

/// Per-call identity overrides.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub name: Option<String>,
    pub bundle_id: Option<String>,
    pub version: Option<String>,
    /// Encoded image (PNG or JPEG) used to regenerate the app icons
    pub icon: Option<Vec<u8>>,
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overrides")
            .field("name", &self.name)
            .field("bundle_id", &self.bundle_id)
            .field("version", &self.version)
            .field("icon", &self.icon.as_ref().map(|i| i.len()))
            .finish()
    }
}
