//! Mailbox quota
//!
//! TigerStyle: Lock-free admission, no silent drops.
//!
//! A quota counts messages that were admitted but whose processing has not
//! started yet. The slot is given back the moment processing begins, so a
//! slow behavior does not hold its own mailbox hostage.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-actor admission counter
#[derive(Debug)]
pub struct QuotaGuard {
    limit: usize,
    admitted: AtomicUsize,
}

impl QuotaGuard {
    /// Create a guard admitting at most `limit` undispatched messages
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "quota limit must be positive");
        Self {
            limit,
            admitted: AtomicUsize::new(0),
        }
    }

    /// Try to admit `count` messages at once
    ///
    /// Either all are admitted or none are.
    pub fn try_admit(&self, count: usize) -> bool {
        if count == 0 {
            return true;
        }
        let previous = self.admitted.fetch_add(count, Ordering::SeqCst);
        if previous.saturating_add(count) > self.limit {
            // Lost the race or over the limit; undo
            self.admitted.fetch_sub(count, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Give back `count` slots
    pub fn release(&self, count: usize) {
        let previous = self.admitted.fetch_sub(count, Ordering::SeqCst);
        debug_assert!(previous >= count, "quota released more than admitted");
    }

    /// Configured limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Messages currently admitted and waiting
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst).min(self.limit)
    }
}
