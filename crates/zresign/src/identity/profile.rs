//! Provisioning profile decoding.
//!
//! A `.mobileprovision` is a CMS envelope around an XML plist. The envelope
//! is not verified here; the plist is located by its `<?xml` / `</plist>`
//! markers and parsed directly.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Fields of a provisioning profile the pipeline relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningProfile {
    pub name: String,
    pub team_name: String,
    pub team_identifiers: Vec<String>,
    pub application_identifier: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    /// `PPQCheck`: the platform revalidates apps signed with this profile
    pub ppq_check: bool,
    pub entitlements: Dictionary,
    /// Raw profile bytes, embedded verbatim into signed bundles
    pub raw: Vec<u8>,
}

impl ProvisioningProfile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        Self::from_bytes(fs::read(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let dict = Self::extract_plist(&data)?;
        let string = |key: &str| dict.get(key).and_then(Value::as_string).map(str::to_string);

        let entitlements = dict
            .get("Entitlements")
            .and_then(Value::as_dictionary)
            .cloned()
            .ok_or_else(|| Error::ProvisioningProfile("No Entitlements in profile".into()))?;

        let team_identifiers = dict
            .get("TeamIdentifier")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_string).map(str::to_string).collect())
            .unwrap_or_default();

        let application_identifier = entitlements
            .get("application-identifier")
            .and_then(Value::as_string)
            .map(str::to_string)
            .or_else(|| string("ApplicationIdentifierPrefix"));

        let expiration = dict
            .get("ExpirationDate")
            .and_then(Value::as_date)
            .map(|d| DateTime::<Utc>::from(SystemTime::from(d)));

        Ok(Self {
            name: string("Name").unwrap_or_default(),
            team_name: string("TeamName").unwrap_or_default(),
            team_identifiers,
            application_identifier,
            expiration,
            ppq_check: dict.get("PPQCheck").and_then(Value::as_boolean).unwrap_or(false),
            entitlements,
            raw: data,
        })
    }

    /// First team identifier, if any.
    pub fn team_id(&self) -> Option<&str> {
        self.team_identifiers.first().map(String::as_str)
    }

    /// Entitlements serialized as an XML plist.
    pub fn entitlements_xml(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        Value::Dictionary(self.entitlements.clone()).to_writer_xml(&mut buf)?;
        Ok(buf)
    }

    /// Locates and parses the plist embedded in the CMS envelope.
    fn extract_plist(data: &[u8]) -> Result<Dictionary> {
        let start = data
            .windows(5)
            .position(|w| w == b"<?xml")
            .ok_or_else(|| Error::ProvisioningProfile("No plist found in profile".into()))?;
        let end = data[start..]
            .windows(8)
            .position(|w| w == b"</plist>")
            .map(|p| start + p + 8)
            .ok_or_else(|| Error::ProvisioningProfile("Unterminated plist in profile".into()))?;

        plist::from_bytes::<Value>(&data[start..end])
            .map_err(|e| Error::ProvisioningProfile(format!("Failed to parse plist: {}", e)))?
            .into_dictionary()
            .ok_or_else(|| Error::ProvisioningProfile("Profile is not a dictionary".into()))
    }
}
