//! Resign & inject orchestration.
//!
//! A run moves through [`PipelineState`] strictly in order:
//!
//! ```text
//! Staging -> MetadataRewrite -> Injecting -> RemovingRequestedLibraries
//!   -> ProvisioningUpdate -> Signing -> Publishing -> Done
//! ```
//!
//! Any error moves it to `Failed` and the staging directory is removed.
//! Runs can be executed inline with [`Pipeline::run`] or on a worker thread
//! with [`Pipeline::spawn`] / [`Pipeline::spawn_with_callback`].

pub mod context;
pub mod handle;
pub mod publish;
pub mod state;

pub use context::PipelineContext;
pub use handle::{CancellationToken, IdleInhibitor, InhibitGuard, NoopInhibitor, SigningHandle};
pub use publish::{PublishOutcome, PENDING_MARKER};
pub use state::{PipelineState, StateObserver};

use crate::bundle::{AppBundle, BundleDescriptor, Manifest, EMBEDDED_PROFILE};
use crate::catalog::{Catalog, IdentityRef, NewSignedApp};
use crate::identity::CertificateRecord;
use crate::macho::remove_library_references;
use crate::options::{InjectionRequest, Overrides, SigningOptions};
use crate::signer::{BundleSigner, SigningJob};
use crate::tweak::{IngestReport, SourceFetcher, TweakInjector};
use crate::{Error, Result};
use log::{debug, info, warn};
use state::StateTracker;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use uuid::Uuid;

/// Everything one run needs from its caller.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// `.app` directory or `.ipa` file; never modified
    pub input: PathBuf,
    pub identity: IdentityRef,
    pub options: SigningOptions,
    pub injection: InjectionRequest,
    pub overrides: Overrides,
    /// Where the input was obtained from, recorded in the catalog
    pub source_url: Option<String>,
}

impl SigningRequest {
    pub fn new(input: impl Into<PathBuf>, identity: IdentityRef) -> Self {
        Self {
            input: input.into(),
            identity,
            options: SigningOptions::default(),
            injection: InjectionRequest::default(),
            overrides: Overrides::default(),
            source_url: None,
        }
    }
}

/// A configured pipeline. Cheap to clone; clones share collaborators.
///
/// Built with [`ZResign`](crate::ZResign).
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) storage_root: PathBuf,
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) signer: Arc<dyn BundleSigner>,
    pub(crate) shim_package: Option<PathBuf>,
    pub(crate) fetcher: Option<Arc<dyn SourceFetcher>>,
    pub(crate) inhibitor: Arc<dyn IdleInhibitor>,
    pub(crate) observer: Option<StateObserver>,
}

impl Pipeline {
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Runs to completion on the calling thread.
    pub fn run(&self, request: SigningRequest) -> Result<PublishOutcome> {
        self.run_with_token(request, &CancellationToken::new())
    }

    /// Like [`run`](Self::run), stopping at the next step boundary once
    /// `token` is cancelled.
    pub fn run_with_token(
        &self,
        request: SigningRequest,
        token: &CancellationToken,
    ) -> Result<PublishOutcome> {
        let reason = format!("Signing {}", request.input.display());
        let _awake = InhibitGuard::acquire(self.inhibitor.as_ref(), &reason);
        let mut tracker = StateTracker::new(self.observer.as_ref(), token);

        match self.execute(request, &mut tracker) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Starts a run on a worker thread.
    pub fn spawn(&self, request: SigningRequest) -> SigningHandle {
        let token = CancellationToken::new();
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let name = thread_name(&request);

        let pipeline = self.clone();
        let worker_token = token.clone();
        let worker_sender = sender.clone();
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let result = pipeline.run_guarded(request, &worker_token);
            // the handle may already be gone
            let _ = worker_sender.send(result);
        });

        let thread = match spawned {
            Ok(thread) => Some(thread),
            Err(e) => {
                let _ = sender.send(Err(e.into()));
                None
            }
        };
        SigningHandle::new(receiver, token, thread)
    }

    /// Starts a run on a worker thread and hands its result to `callback`,
    /// which is invoked exactly once.
    pub fn spawn_with_callback<F>(&self, request: SigningRequest, callback: F) -> CancellationToken
    where
        F: FnOnce(Result<PublishOutcome>) + Send + 'static,
    {
        let token = CancellationToken::new();
        let slot = Arc::new(Mutex::new(Some(callback)));
        let name = thread_name(&request);

        let pipeline = self.clone();
        let worker_token = token.clone();
        let worker_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new().name(name).spawn(move || {
            let result = pipeline.run_guarded(request, &worker_token);
            deliver(&worker_slot, result);
        });
        if let Err(e) = spawned {
            deliver(&slot, Err(e.into()));
        }
        token
    }

    /// Publications whose catalog registration never completed.
    pub fn pending_publications(&self) -> Result<Vec<PathBuf>> {
        publish::pending_publications(&self.storage_root)
    }

    fn run_guarded(&self, request: SigningRequest, token: &CancellationToken) -> Result<PublishOutcome> {
        panic::catch_unwind(AssertUnwindSafe(|| self.run_with_token(request, token)))
            .unwrap_or_else(|_| Err(Error::Io(std::io::Error::other("signing run panicked"))))
    }

    fn execute(&self, request: SigningRequest, tracker: &mut StateTracker<'_>) -> Result<PublishOutcome> {
        let SigningRequest {
            input,
            identity,
            options,
            injection,
            overrides,
            source_url,
        } = request;

        tracker.enter(PipelineState::Staging)?;
        let (profile_path, key_path) = self.catalog.certificate_paths(&identity)?;
        let record = CertificateRecord::resolve(&profile_path, &key_path, identity.password)?;
        let ctx = PipelineContext::stage(&self.storage_root, &input, source_url.clone())?;

        tracker.enter(PipelineState::MetadataRewrite)?;
        let resolved = resolve_overrides(ctx.descriptor(), &options, &overrides, record.ppq_check);
        let targets = ctx.targets(options.include_extensions)?;
        for (index, target) in targets.iter().enumerate() {
            let mut manifest = Manifest::open(target.path())?;
            let target_overrides = if index == 0 {
                resolved.clone()
            } else {
                extension_overrides(
                    manifest.get_str("CFBundleIdentifier"),
                    &ctx.descriptor().bundle_id,
                    resolved.bundle_id.as_deref(),
                )
            };
            manifest.apply(&options, &target_overrides, target.path())?;
            manifest.save()?;
        }

        tracker.enter(PipelineState::Injecting)?;
        if !injection.sources.is_empty() {
            for target in &targets {
                let report = self.inject(target, &injection.sources)?;
                debug!("{}: {:?}", target.path().display(), report);
            }
        }

        tracker.enter(PipelineState::RemovingRequestedLibraries)?;
        if !injection.remove.is_empty() {
            for target in &targets {
                match target.find_executable() {
                    Some(exe) => {
                        let removed = remove_library_references(&exe, &injection.remove[..])?;
                        info!("Removed {} load commands from {}", removed, exe.display());
                    }
                    None => warn!("{} has no executable, nothing removed", target.path().display()),
                }
            }
        }

        tracker.enter(PipelineState::ProvisioningUpdate)?;
        fs::write(ctx.app().path().join(EMBEDDED_PROFILE), &record.profile.raw)?;

        tracker.enter(PipelineState::Signing)?;
        self.signer.sign(&SigningJob {
            bundle: ctx.app().path(),
            profile: &record.profile_path,
            key_container: &record.key_container_path,
            password: &record.password,
        })?;

        tracker.enter(PipelineState::Publishing)?;
        let signed = ctx.app().descriptor(source_url)?;
        let icon = Manifest::open(ctx.app().path())
            .ok()
            .and_then(|m| m.primary_icon_name());
        let id = Uuid::new_v4();
        let new_app = NewSignedApp {
            id,
            storage_path: self.storage_root.join(id.to_string()),
            app_name: ctx.app_name(),
            bundle_id: signed.bundle_id,
            name: signed.name,
            version: signed.version,
            expiration: record.expiration,
            team_name: record.team_name.clone(),
            source_url: signed.source_url,
            icon,
        };
        let outcome = publish::publish(ctx.app().path(), new_app, self.catalog.as_ref())?;
        drop(ctx);

        tracker.enter(PipelineState::Done)?;
        Ok(outcome)
    }

    fn inject(&self, target: &AppBundle, sources: &[String]) -> Result<IngestReport> {
        TweakInjector::new(target)
            .shim_package(self.shim_package.as_deref())
            .fetcher(self.fetcher.as_deref())
            .run(sources)
    }
}

fn thread_name(request: &SigningRequest) -> String {
    let stem = request
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("zresign-{}", stem)
}

fn deliver<F>(slot: &Mutex<Option<F>>, result: Result<PublishOutcome>)
where
    F: FnOnce(Result<PublishOutcome>),
{
    let callback = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(callback) = callback {
        callback(result);
    }
}

/// Overrides for the main app after applying the option maps and trust-check
/// protection. An explicit override beats a map entry, and either beats the
/// trust-check suffix, which is only appended to the original identifier.
fn resolve_overrides(
    descriptor: &BundleDescriptor,
    options: &SigningOptions,
    overrides: &Overrides,
    ppq_check: bool,
) -> Overrides {
    let mut bundle_id = overrides
        .bundle_id
        .clone()
        .or_else(|| options.bundle_id_overrides.get(&descriptor.bundle_id).cloned());
    let name = overrides
        .name
        .clone()
        .or_else(|| options.display_name_overrides.get(&descriptor.name).cloned());

    if bundle_id.is_none() && options.ppq_protection && ppq_check {
        let suffix = if options.ppq_suffix.is_empty() {
            let random = Uuid::new_v4().simple().to_string();
            random[..8].to_string()
        } else {
            options.ppq_suffix.clone()
        };
        bundle_id = Some(format!("{}.{}", descriptor.bundle_id, suffix));
    }

    Overrides {
        name,
        bundle_id,
        version: overrides.version.clone(),
        icon: overrides.icon.clone(),
    }
}

/// Keeps an extension's identifier nested under the app's new identifier.
fn extension_overrides(
    extension_id: Option<&str>,
    original_app_id: &str,
    new_app_id: Option<&str>,
) -> Overrides {
    let bundle_id = match (extension_id, new_app_id) {
        (Some(ext), Some(new)) if !original_app_id.is_empty() && ext.starts_with(original_app_id) => {
            Some(format!("{}{}", new, &ext[original_app_id.len()..]))
        }
        _ => None,
    };
    Overrides {
        bundle_id,
        ..Overrides::default()
    }
}
