//! Render cancellation
//!
//! A [`Cancellation`] is handed to the engine by the caller. The engine checks
//! it before each template and around every lookup, so a cancelled render
//! stops with an error instead of producing a partial document.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a render was aborted
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    #[error("render was cancelled")]
    Requested,

    #[error("render deadline exceeded")]
    DeadlineExceeded,
}

/// Shared cancellation flag with an optional deadline
///
/// Clones share the same flag: cancelling one cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A token that is never cancelled unless [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort once `timeout` has elapsed from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Err` once cancelled or past the deadline
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.flag.load(Ordering::SeqCst) {
            return Err(Cancelled::Requested);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Cancelled::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_cancelled_by_default() {
        let cancel = Cancellation::new();
        assert!(cancel.check().is_ok());
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let cancel = Cancellation::new();
        let clone = cancel.clone();
        clone.cancel();
        assert_eq!(cancel.check(), Err(Cancelled::Requested));
    }

    #[test]
    fn test_deadline() {
        let past = Cancellation::new().with_deadline(Instant::now());
        assert_eq!(past.check(), Err(Cancelled::DeadlineExceeded));

        let future = Cancellation::new().with_timeout(Duration::from_secs(3600));
        assert!(future.check().is_ok());
        assert!(future.deadline().is_some());
    }
}
