//! Cooperative cancellation and the one-run-at-a-time guard for pipelines.

use crate::error::{SmugglerError, SmugglerResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a pipeline checks between batches.
///
/// A batch already in flight always completes; the run stops at the next
/// check and returns [`SmugglerError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates an unset handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clears a previous request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` if cancellation was requested.
    pub fn check(&self) -> SmugglerResult<()> {
        if self.is_cancelled() {
            Err(SmugglerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Admits at most one run of a pipeline at a time.
#[derive(Debug, Default)]
pub(crate) struct RunSlot {
    busy: AtomicBool,
}

impl RunSlot {
    /// Claims the slot, failing with `Busy` naming `target` if a run holds it.
    pub(crate) fn claim(&self, target: impl Into<String>) -> SmugglerResult<RunClaim<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SmugglerError::busy(target))?;
        Ok(RunClaim { slot: self })
    }
}

/// Releases its [`RunSlot`] on drop.
#[derive(Debug)]
pub(crate) struct RunClaim<'a> {
    slot: &'a RunSlot,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}
