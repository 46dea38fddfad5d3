//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::x509::{X509Builder, X509NameBuilder};
use plist::{Dictionary, Value};
use secrecy::SecretString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zresign::{
    BundleSigner, Catalog, DirectoryCatalog, Error, IdentityRef, IdleInhibitor, NewSignedApp,
    Result, SignedAppRecord, SigningJob,
};

pub const SYSTEM: &str = "/usr/lib/libSystem.B.dylib";
pub const SUBSTRATE: &str = "/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate";
pub const PASSWORD: &str = "hunter2";

const MH_MAGIC_64: u32 = 0xfeedfacf;
const CPU_TYPE_ARM64: u32 = 0x0100_000c;
const MH_EXECUTE: u32 = 0x2;
const LC_SEGMENT_64: u32 = 0x19;
const LC_LOAD_DYLIB: u32 = 0xc;

fn put(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// A 64-bit arm64 executable depending on `libs`, with its code at 0x1000.
pub fn executable(libs: &[&str]) -> Vec<u8> {
    let dylibs: Vec<Vec<u8>> = libs
        .iter()
        .map(|lib| {
            let size = (24 + lib.len() + 1 + 7) & !7;
            let mut cmd = vec![0u8; size];
            put(&mut cmd, 0, LC_LOAD_DYLIB);
            put(&mut cmd, 4, size as u32);
            put(&mut cmd, 8, 24);
            put(&mut cmd, 12, 2);
            put(&mut cmd, 16, 0x0001_0000);
            put(&mut cmd, 20, 0x0001_0000);
            cmd[24..24 + lib.len()].copy_from_slice(lib.as_bytes());
            cmd
        })
        .collect();

    let total = 0x2000;
    let segment = 72 + 80;
    let sizeofcmds = segment + dylibs.iter().map(Vec::len).sum::<usize>();
    let mut out = vec![0u8; total];
    put(&mut out, 0, MH_MAGIC_64);
    put(&mut out, 4, CPU_TYPE_ARM64);
    put(&mut out, 12, MH_EXECUTE);
    put(&mut out, 16, 1 + dylibs.len() as u32);
    put(&mut out, 20, sizeofcmds as u32);

    let seg = 32;
    put(&mut out, seg, LC_SEGMENT_64);
    put(&mut out, seg + 4, segment as u32);
    out[seg + 8..seg + 14].copy_from_slice(b"__TEXT");
    put(&mut out, seg + 32, total as u32);
    put(&mut out, seg + 48, total as u32);
    put(&mut out, seg + 56, 5);
    put(&mut out, seg + 60, 5);
    put(&mut out, seg + 64, 1);

    let sect = seg + 72;
    out[sect..sect + 6].copy_from_slice(b"__text");
    out[sect + 16..sect + 22].copy_from_slice(b"__TEXT");
    put(&mut out, sect + 40, 0x100);
    put(&mut out, sect + 48, 0x1000);

    let mut at = sect + 80;
    for cmd in &dylibs {
        out[at..at + cmd.len()].copy_from_slice(cmd);
        at += cmd.len();
    }
    out
}

fn write_info(dir: &Path, entries: &[(&str, &str)]) {
    let mut info = Dictionary::new();
    for (key, value) in entries {
        info.insert((*key).into(), Value::String((*value).into()));
    }
    Value::Dictionary(info).to_file_xml(dir.join("Info.plist")).unwrap();
}

/// Creates `<dir>/<name>.app` whose executable depends on `libs`.
pub fn make_app(dir: &Path, name: &str, libs: &[&str]) -> PathBuf {
    let app = dir.join(format!("{}.app", name));
    fs::create_dir_all(&app).unwrap();
    let bundle_id = format!("com.example.{}", name.to_lowercase());
    write_info(
        &app,
        &[
            ("CFBundleExecutable", name),
            ("CFBundleIdentifier", bundle_id.as_str()),
            ("CFBundleDisplayName", name),
            ("CFBundleShortVersionString", "1.0"),
        ],
    );
    fs::write(app.join(name), executable(libs)).unwrap();
    app
}

/// Adds `PlugIns/<name>.appex` identified as `bundle_id`.
pub fn add_extension(app: &Path, name: &str, bundle_id: &str) -> PathBuf {
    let appex = app.join("PlugIns").join(format!("{}.appex", name));
    fs::create_dir_all(&appex).unwrap();
    write_info(
        &appex,
        &[("CFBundleExecutable", name), ("CFBundleIdentifier", bundle_id)],
    );
    fs::write(appex.join(name), executable(&[SYSTEM])).unwrap();
    appex
}

/// Marks `app` as already shipping a substrate framework.
pub fn add_substrate(app: &Path) {
    fs::create_dir_all(app.join("Frameworks/CydiaSubstrate.framework")).unwrap();
}

pub fn read_info(bundle: &Path) -> Dictionary {
    Value::from_file(bundle.join("Info.plist"))
        .unwrap()
        .into_dictionary()
        .unwrap()
}

pub fn info_str(bundle: &Path, key: &str) -> Option<String> {
    read_info(bundle)
        .get(key)
        .and_then(Value::as_string)
        .map(str::to_string)
}

/// A `.deb` with a gzip payload holding `files`.
pub fn deb(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut tar = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        tar.append_data(&mut header, path, &data[..]).unwrap();
    }
    let tar = tar.into_inner().unwrap();
    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&tar).unwrap();
    let payload = gz.finish().unwrap();

    let mut builder = ar::Builder::new(Vec::new());
    for (name, data) in [
        ("debian-binary", b"2.0\n".to_vec()),
        ("control.tar.gz", Vec::new()),
        ("data.tar.gz", payload),
    ] {
        let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
        builder.append(&header, &data[..]).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Files of a rootless package shipping `CydiaSubstrate.framework`.
pub fn shim_files() -> Vec<(String, Vec<u8>)> {
    let prefix = "var/jb/Library/Frameworks/CydiaSubstrate.framework";
    let mut info = Dictionary::new();
    info.insert("CFBundleExecutable".into(), Value::String("CydiaSubstrate".into()));
    let mut xml = Vec::new();
    Value::Dictionary(info).to_writer_xml(&mut xml).unwrap();
    vec![
        (format!("{prefix}/Info.plist"), xml),
        (format!("{prefix}/CydiaSubstrate"), executable(&[SYSTEM])),
    ]
}

pub fn profile_bytes(ppq: bool) -> Vec<u8> {
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>Name</key>
    <string>Wildcard</string>
    <key>TeamName</key>
    <string>Example Team</string>
    <key>TeamIdentifier</key>
    <array><string>ABCDE12345</string></array>
    <key>ExpirationDate</key>
    <date>2031-01-01T00:00:00Z</date>
    <key>PPQCheck</key>
    <{}/>
    <key>Entitlements</key>
    <dict>
        <key>application-identifier</key>
        <string>ABCDE12345.*</string>
    </dict>
</dict>
</plist>"#,
        if ppq { "true" } else { "false" }
    );
    let mut data = b"\x30\x82\x0f\x00envelope".to_vec();
    data.extend_from_slice(body.as_bytes());
    data.extend_from_slice(b"\xa0\x82signature");
    data
}

pub fn p12_bytes(password: &str) -> Vec<u8> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "Apple Distribution: Example").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(365).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    Pkcs12::builder()
        .name("identity")
        .pkey(&key)
        .cert(&cert)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap()
}

/// One signing call as seen by [`RecordingSigner`].
#[derive(Debug, Clone)]
pub struct SignCall {
    pub bundle: PathBuf,
    pub profile_embedded: bool,
}

/// Signer that records its calls and stamps a fake signature.
#[derive(Clone, Default)]
pub struct RecordingSigner {
    pub calls: Arc<Mutex<Vec<SignCall>>>,
    pub fail_with: Option<String>,
}

impl RecordingSigner {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<SignCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl BundleSigner for RecordingSigner {
    fn sign(&self, job: &SigningJob<'_>) -> Result<()> {
        self.calls.lock().unwrap().push(SignCall {
            bundle: job.bundle.to_path_buf(),
            profile_embedded: job.bundle.join("embedded.mobileprovision").is_file(),
        });
        if let Some(message) = &self.fail_with {
            return Err(Error::SigningToolFailed(message.clone()));
        }
        let signature = job.bundle.join("_CodeSignature");
        fs::create_dir_all(&signature)?;
        fs::write(signature.join("CodeResources"), b"signed")?;
        Ok(())
    }
}

/// Inhibitor counting how often it is held.
#[derive(Clone, Default)]
pub struct CountingInhibitor {
    pub held: Arc<AtomicUsize>,
    pub acquired: Arc<AtomicUsize>,
}

impl CountingInhibitor {
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl IdleInhibitor for CountingInhibitor {
    fn inhibit(&self, _reason: &str) {
        self.held.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Catalog that knows identities but refuses to record apps.
pub struct RefusingCatalog(pub DirectoryCatalog);

impl Catalog for RefusingCatalog {
    fn create_signed_app_record(&self, _app: NewSignedApp) -> Result<SignedAppRecord> {
        Err(Error::CatalogRegistrationFailed("read-only catalog".into()))
    }

    fn current_signing_identity(&self) -> Option<IdentityRef> {
        self.0.current_signing_identity()
    }

    fn certificate_paths(&self, identity: &IdentityRef) -> Result<(PathBuf, PathBuf)> {
        self.0.certificate_paths(identity)
    }
}

/// A temporary workspace with a catalog holding one current certificate.
pub struct Workspace {
    pub dir: TempDir,
    pub storage: PathBuf,
    pub catalog_root: PathBuf,
}

impl Workspace {
    pub fn new(ppq: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let storage = dir.path().join("apps");
        let catalog_root = dir.path().join("catalog");

        let profile = dir.path().join("dist.mobileprovision");
        let p12 = dir.path().join("dist.p12");
        fs::write(&profile, profile_bytes(ppq)).unwrap();
        fs::write(&p12, p12_bytes(PASSWORD)).unwrap();
        let password = SecretString::new(PASSWORD.into());
        DirectoryCatalog::new(&catalog_root)
            .import_certificate("dist", &profile, &p12, Some(&password), true)
            .unwrap();

        Self {
            dir,
            storage,
            catalog_root,
        }
    }

    pub fn catalog(&self) -> DirectoryCatalog {
        DirectoryCatalog::new(&self.catalog_root)
    }

    pub fn identity(&self) -> IdentityRef {
        self.catalog().current_signing_identity().unwrap()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, data: &[u8]) -> String {
        let path = self.dir.path().join(name);
        fs::write(&path, data).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Entries left under the staging directory.
    pub fn staging_entries(&self) -> usize {
        fs::read_dir(self.storage.join(".staging"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Publication directories in storage.
    pub fn publications(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.storage)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.file_name().is_some_and(|n| n != ".staging"))
                    .collect()
            })
            .unwrap_or_default();
        dirs.sort();
        dirs
    }
}
