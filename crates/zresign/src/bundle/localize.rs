//! Localized display-name rewriting.
//!
//! `InfoPlist.strings` files come in two shapes: compiled property lists
//! (binary or XML) and the old `"key" = "value";` text form. Property lists
//! are edited through the `plist` crate; text files are rewritten line by
//! line.

use crate::{Error, Result};
use log::debug;
use plist::Value;
use std::fs;
use std::path::{Path, PathBuf};

const DISPLAY_NAME_KEY: &str = "CFBundleDisplayName";
const STRINGS_FILE: &str = "InfoPlist.strings";

/// Sets the localized display name in every `*.lproj/InfoPlist.strings`
/// directly under `bundle`. Returns the files rewritten.
pub fn rewrite_display_name(bundle: &Path, display_name: &str) -> Result<Vec<PathBuf>> {
    let mut rewritten = Vec::new();
    let mut files: Vec<PathBuf> = fs::read_dir(bundle)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && p.extension().is_some_and(|e| e == "lproj"))
        .map(|p| p.join(STRINGS_FILE))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    for path in files {
        rewrite_file(&path, display_name)?;
        rewritten.push(path);
    }
    debug!("Localized display name in {} files", rewritten.len());
    Ok(rewritten)
}

/// Rewrites one strings file. Any read or write failure is a
/// `ManifestWriteFailed` for that file.
fn rewrite_file(path: &Path, display_name: &str) -> Result<()> {
    let failed = |source: std::io::Error| Error::ManifestWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let data = fs::read(path).map_err(failed)?;

    let out = match Value::from_reader(std::io::Cursor::new(&data)) {
        Ok(Value::Dictionary(mut dict)) => {
            dict.insert(DISPLAY_NAME_KEY.into(), Value::String(display_name.into()));
            let mut buf = Vec::new();
            Value::Dictionary(dict).to_writer_xml(&mut buf)?;
            buf
        }
        _ => rewrite_strings_text(&String::from_utf8_lossy(&data), display_name).into_bytes(),
    };
    fs::write(path, out).map_err(failed)
}

/// Replaces (or appends) the display-name entry in text `.strings` content.
pub fn rewrite_strings_text(text: &str, display_name: &str) -> String {
    let escaped = display_name.replace('\\', "\\\\").replace('"', "\\\"");
    let entry = format!("\"{}\" = \"{}\";", DISPLAY_NAME_KEY, escaped);

    let mut found = false;
    let mut lines: Vec<String> = text
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let is_entry = trimmed.starts_with(&format!("\"{}\"", DISPLAY_NAME_KEY))
                || trimmed.starts_with(DISPLAY_NAME_KEY);
            if is_entry {
                found = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(entry);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::Dictionary;
    use tempfile::TempDir;

    #[test]
    fn test_text_replace_and_append() {
        let text = "/* comment */\n\"CFBundleDisplayName\" = \"Old\";\n\"CFBundleName\" = \"Old\";\n";
        let out = rewrite_strings_text(text, "New \"Name\"");
        assert!(out.contains("\"CFBundleDisplayName\" = \"New \\\"Name\\\"\";"));
        assert!(out.contains("\"CFBundleName\" = \"Old\";"));
        assert_eq!(out.matches("CFBundleDisplayName").count(), 1);

        let out = rewrite_strings_text("\"CFBundleName\" = \"X\";", "New");
        assert!(out.ends_with("\"CFBundleDisplayName\" = \"New\";\n"));
    }

    #[test]
    fn test_rewrite_plist_and_text_variants() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path();
        fs::create_dir_all(bundle.join("en.lproj")).unwrap();
        fs::create_dir_all(bundle.join("fr.lproj")).unwrap();
        fs::create_dir_all(bundle.join("de.lproj")).unwrap();

        let mut dict = Dictionary::new();
        dict.insert(DISPLAY_NAME_KEY.into(), Value::String("Old".into()));
        Value::Dictionary(dict)
            .to_file_binary(bundle.join("en.lproj/InfoPlist.strings"))
            .unwrap();
        fs::write(
            bundle.join("fr.lproj/InfoPlist.strings"),
            "\"CFBundleDisplayName\" = \"Vieux\";\n",
        )
        .unwrap();

        let files = rewrite_display_name(bundle, "Neu").unwrap();
        assert_eq!(files.len(), 2);

        let en = Value::from_file(bundle.join("en.lproj/InfoPlist.strings")).unwrap();
        assert_eq!(
            en.as_dictionary().unwrap().get(DISPLAY_NAME_KEY).unwrap().as_string(),
            Some("Neu")
        );
        let fr = fs::read_to_string(bundle.join("fr.lproj/InfoPlist.strings")).unwrap();
        assert!(fr.contains("Neu"));
        assert!(!fr.contains("Vieux"));
    }

    #[test]
    #[cfg(unix)]
    fn test_unwritable_strings_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path();
        fs::create_dir_all(bundle.join("en.lproj")).unwrap();
        fs::create_dir_all(bundle.join("fr.lproj")).unwrap();
        fs::write(bundle.join("fr.lproj/InfoPlist.strings"), "\"CFBundleDisplayName\" = \"Old\";\n").unwrap();
        // readable, but every write fails
        std::os::unix::fs::symlink("/proc/version", bundle.join("en.lproj/InfoPlist.strings")).unwrap();
        if !bundle.join("en.lproj/InfoPlist.strings").is_file() {
            return;
        }

        let err = rewrite_display_name(bundle, "New").unwrap_err();
        match err {
            Error::ManifestWriteFailed { path, .. } => {
                assert_eq!(path, bundle.join("en.lproj/InfoPlist.strings"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
