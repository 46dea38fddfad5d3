//! Handles for background runs.

use super::PublishOutcome;
use crate::{Error, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Shared flag asking a run to stop at the next step boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single-result promise for a run started with
/// [`Pipeline::spawn`](super::Pipeline::spawn).
///
/// The result is delivered once: after `try_result` has returned it, `wait`
/// reports the run as gone.
pub struct SigningHandle {
    receiver: Receiver<Result<PublishOutcome>>,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl SigningHandle {
    pub(crate) fn new(
        receiver: Receiver<Result<PublishOutcome>>,
        token: CancellationToken,
        thread: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            receiver,
            token,
            thread,
        }
    }

    /// Requests cancellation. Has no effect once signing has started.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the result if the run has finished.
    pub fn try_result(&mut self) -> Option<Result<PublishOutcome>> {
        match self.receiver.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(worker_gone())),
        }
    }

    /// Blocks until the run finishes.
    pub fn wait(mut self) -> Result<PublishOutcome> {
        let result = self.receiver.recv().unwrap_or_else(|_| Err(worker_gone()));
        self.join();
        result
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                debug!("signing worker panicked after reporting");
            }
        }
    }
}

fn worker_gone() -> Error {
    Error::Io(std::io::Error::other("signing worker exited without a result"))
}

/// Keeps the host from idling while a run is in progress.
pub trait IdleInhibitor: Send + Sync {
    fn inhibit(&self, reason: &str);
    fn release(&self);
}

/// Inhibitor that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInhibitor;

impl IdleInhibitor for NoopInhibitor {
    fn inhibit(&self, _reason: &str) {}
    fn release(&self) {}
}

/// Releases the inhibitor when dropped.
pub struct InhibitGuard<'a> {
    inhibitor: &'a dyn IdleInhibitor,
}

impl<'a> InhibitGuard<'a> {
    pub fn acquire(inhibitor: &'a dyn IdleInhibitor, reason: &str) -> Self {
        inhibitor.inhibit(reason);
        Self { inhibitor }
    }
}

impl Drop for InhibitGuard<'_> {
    fn drop(&mut self) {
        self.inhibitor.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        held: AtomicUsize,
        acquired: AtomicUsize,
    }

    impl IdleInhibitor for Counting {
        fn inhibit(&self, _reason: &str) {
            self.held.fetch_add(1, Ordering::SeqCst);
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&self) {
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_guard_releases_on_unwind() {
        let inhibitor = Counting::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = InhibitGuard::acquire(&inhibitor, "test");
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(inhibitor.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(inhibitor.held.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_handle_reports_disconnected_worker() {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        drop(sender);
        let mut handle = SigningHandle::new(receiver, CancellationToken::new(), None);
        assert!(matches!(handle.try_result(), Some(Err(Error::Io(_)))));
    }
}
