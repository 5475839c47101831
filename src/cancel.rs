//! Cooperative cancellation (A3), checked before every external I/O call —
//! DB query, embedding call, LLM call — rather than threaded through as a
//! `tokio::select!` race at each call site.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{EngramError, Result};

/// A cheap, cloneable flag. Tripping it from any clone is visible to all
/// others; there is no un-tripping.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tripped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self {
            tripped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.tripped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if tripped; callers invoke this immediately
    /// before each suspension point.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngramError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, but return early with `Cancelled` if the token
    /// trips mid-sleep. Used by the LLM adapter's backoff loop so a
    /// cancellation signal takes precedence over any scheduled retry.
    pub async fn sleep_or_cancel(&self, duration: std::time::Duration) -> Result<()> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.check(),
            _ = self.notify.notified() => Err(EngramError::Cancelled),
        }
    }
}
