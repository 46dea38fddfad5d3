//! `Info.plist` rewriting.
//!
//! All edits happen on an in-memory dictionary; [`Manifest::save`] writes it
//! back once, and only when at least one edit applied.

use crate::options::{Overrides, SigningOptions};
use crate::{Error, Result};
use image::imageops::FilterType;
use image::ImageFormat;
use log::{debug, info};
use plist::{Dictionary, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::localize;

/// Edge lengths of the generated icon set.
pub const ICON_SIZES: [u32; 4] = [60, 76, 120, 152];

/// An editable bundle manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    dict: Dictionary,
    changed: Vec<String>,
}

impl Manifest {
    /// Loads `<bundle>/Info.plist`.
    pub fn open(bundle: impl AsRef<Path>) -> Result<Self> {
        let dict = super::AppBundle::new(bundle.as_ref()).read_info()?;
        Ok(Self {
            path: bundle.as_ref().join("Info.plist"),
            dict,
            changed: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.dict.get(key).and_then(Value::as_string)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.dict.contains_key(key)
    }

    /// Keys touched since the manifest was opened, in edit order.
    pub fn changed_keys(&self) -> &[String] {
        &self.changed
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn set(&mut self, key: &str, value: Value) {
        if self.dict.get(key) != Some(&value) {
            self.dict.insert(key.to_string(), value);
            self.changed.push(key.to_string());
        }
    }

    pub fn remove(&mut self, key: &str) {
        if self.dict.remove(key).is_some() {
            self.changed.push(key.to_string());
        }
    }

    /// First primary icon file name, as recorded in `CFBundleIcons`.
    pub fn primary_icon_name(&self) -> Option<String> {
        self.dict
            .get("CFBundleIcons")?
            .as_dictionary()?
            .get("CFBundlePrimaryIcon")?
            .as_dictionary()?
            .get("CFBundleIconFiles")?
            .as_array()?
            .first()?
            .as_string()
            .map(str::to_string)
    }

    /// Applies the option toggles and identity overrides.
    ///
    /// Icon files and localized strings are written into `bundle` directly;
    /// the manifest itself is only changed in memory.
    pub fn apply(
        &mut self,
        options: &SigningOptions,
        overrides: &Overrides,
        bundle: impl AsRef<Path>,
    ) -> Result<()> {
        let bundle = bundle.as_ref();

        if let Some(icon) = &overrides.icon {
            self.install_icons(icon, bundle)?;
        }

        if options.force_localize {
            if let Some(name) = &overrides.name {
                match self.get_str("CFBundleDisplayName") {
                    Some(current) if current != name => {
                        localize::rewrite_display_name(bundle, name)?;
                    }
                    Some(_) => {}
                    None => debug!("{}: no CFBundleDisplayName, not localizing", bundle.display()),
                }
            }
        }

        if options.force_file_sharing {
            self.set("UISupportsDocumentBrowser", Value::Boolean(true));
        }
        if options.force_itunes_file_sharing {
            self.set("UIFileSharingEnabled", Value::Boolean(true));
        }
        if options.remove_supported_devices {
            self.remove("UISupportedDevices");
        }
        if options.remove_url_scheme {
            self.remove("CFBundleURLTypes");
        }
        if options.force_pro_motion {
            self.set("CADisableMinimumFrameDurationOnPhone", Value::Boolean(true));
        }
        if options.force_game_mode {
            self.set("GCSupportsGameMode", Value::Boolean(true));
        }
        if options.force_full_screen {
            self.set("UIRequiresFullScreen", Value::Boolean(true));
        }
        if let crate::options::MinimumVersion::Version(version) = &options.force_minimum_version {
            self.set("MinimumOSVersion", Value::String(version.clone()));
        }
        if let Some(style) = options.force_appearance.style() {
            self.set("UIUserInterfaceStyle", Value::String(style.into()));
        }

        if let Some(bundle_id) = &overrides.bundle_id {
            self.set("CFBundleIdentifier", Value::String(bundle_id.clone()));
        }
        if let Some(name) = &overrides.name {
            self.set("CFBundleDisplayName", Value::String(name.clone()));
        }
        if let Some(version) = &overrides.version {
            self.set("CFBundleShortVersionString", Value::String(version.clone()));
        }
        Ok(())
    }

    /// Resizes `image` to every size in [`ICON_SIZES`], writes
    /// `AppIcon{n}x{n}.png` into `bundle` and points `CFBundleIcons` at them.
    fn install_icons(&mut self, image: &[u8], bundle: &Path) -> Result<()> {
        let source = image::load_from_memory(image)?;
        let mut files = Vec::with_capacity(ICON_SIZES.len());

        for size in ICON_SIZES {
            let name = format!("AppIcon{size}x{size}.png");
            let resized = source.resize_exact(size, size, FilterType::Lanczos3);
            resized.save_with_format(bundle.join(&name), ImageFormat::Png)?;
            debug!("Wrote {}", name);
            files.push(Value::String(name));
        }

        let mut primary = Dictionary::new();
        primary.insert("CFBundleIconFiles".into(), Value::Array(files));
        primary.insert("CFBundleIconName".into(), Value::String("AppIcon".into()));
        let mut icons = Dictionary::new();
        icons.insert("CFBundlePrimaryIcon".into(), Value::Dictionary(primary));
        self.set("CFBundleIcons", Value::Dictionary(icons));
        Ok(())
    }

    /// Writes the manifest if anything changed. Returns whether it wrote.
    pub fn save(&mut self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        let mut buf = Vec::new();
        Value::Dictionary(self.dict.clone()).to_writer_xml(&mut buf)?;
        fs::write(&self.path, &buf).map_err(|source| Error::ManifestWriteFailed {
            path: self.path.clone(),
            source,
        })?;

        info!("Updated {} ({})", self.path.display(), self.changed.join(", "));
        self.changed.clear();
        Ok(true)
    }
}
