//! Coordinator metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time transaction counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionMetrics {
    /// Native transactions begun by the coordinator
    pub total_begun: u64,
    /// Native transactions committed
    pub total_committed: u64,
    /// Native transactions rolled back
    pub total_rolled_back: u64,
    /// Requests that joined an existing transaction
    pub total_participating: u64,
    /// Transactions suspended for an inner scope
    pub total_suspended: u64,
    /// Transactions begun and not yet completed
    pub active_count: u64,
    /// Committed / (committed + rolled back), 1.0 when nothing completed
    pub commit_rate: f64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    participating: AtomicU64,
    suspended: AtomicU64,
    active: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn begun(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) {
        // Never below zero, even if completion is recorded twice
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn participating(&self) {
        self.participating.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn suspended(&self) {
        self.suspended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransactionMetrics {
        let committed = self.committed.load(Ordering::Relaxed);
        let rolled_back = self.rolled_back.load(Ordering::Relaxed);
        let finished = committed + rolled_back;
        TransactionMetrics {
            total_begun: self.begun.load(Ordering::Relaxed),
            total_committed: committed,
            total_rolled_back: rolled_back,
            total_participating: self.participating.load(Ordering::Relaxed),
            total_suspended: self.suspended.load(Ordering::Relaxed),
            active_count: self.active.load(Ordering::Relaxed),
            commit_rate: if finished == 0 {
                1.0
            } else {
                committed as f64 / finished as f64
            },
        }
    }
}
