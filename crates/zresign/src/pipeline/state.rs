//! Run states and transition tracking.

use super::handle::CancellationToken;
use crate::{Error, Result};
use log::{debug, error};
use std::fmt;
use std::sync::Arc;

/// Step a run is in. Steps only ever move forward; `Failed` is absorbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Staging,
    MetadataRewrite,
    Injecting,
    RemovingRequestedLibraries,
    ProvisioningUpdate,
    Signing,
    Publishing,
    Done,
    Failed(String),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }

    /// Whether a cancellation request is still honoured before this step.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            PipelineState::Staging
                | PipelineState::MetadataRewrite
                | PipelineState::Injecting
                | PipelineState::RemovingRequestedLibraries
                | PipelineState::ProvisioningUpdate
                | PipelineState::Signing
        )
    }

    fn name(&self) -> &'static str {
        match self {
            PipelineState::Staging => "staging",
            PipelineState::MetadataRewrite => "metadata rewrite",
            PipelineState::Injecting => "injecting",
            PipelineState::RemovingRequestedLibraries => "removing requested libraries",
            PipelineState::ProvisioningUpdate => "provisioning update",
            PipelineState::Signing => "signing",
            PipelineState::Publishing => "publishing",
            PipelineState::Done => "done",
            PipelineState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Callback told of every state a run enters.
pub type StateObserver = Arc<dyn Fn(&PipelineState) + Send + Sync>;

/// Drives one run's state forward and reports it.
pub(crate) struct StateTracker<'a> {
    current: Option<PipelineState>,
    observer: Option<&'a StateObserver>,
    token: &'a CancellationToken,
}

impl<'a> StateTracker<'a> {
    pub fn new(observer: Option<&'a StateObserver>, token: &'a CancellationToken) -> Self {
        Self {
            current: None,
            observer,
            token,
        }
    }

    /// Enters `next`, failing with `Cancelled` if cancellation was requested
    /// and `next` can still be cancelled.
    pub fn enter(&mut self, next: PipelineState) -> Result<()> {
        if next.is_cancellable() && self.token.is_cancelled() {
            return Err(Error::Cancelled(next.name().to_string()));
        }
        debug!("Pipeline: {}", next);
        self.notify(&next);
        self.current = Some(next);
        Ok(())
    }

    pub fn fail(&mut self, err: &Error) {
        let failed = PipelineState::Failed(err.to_string());
        error!("Pipeline {}", failed);
        self.notify(&failed);
        self.current = Some(failed);
    }

    fn notify(&self, state: &PipelineState) {
        if let Some(observer) = self.observer {
            observer(state);
        }
    }
}
