//! Protocol Counters
//!
//! Lock-free counters for token delivery and recipe polling, shared by
//! reference with whoever wants to report them.

use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Delivery Stats
// =============================================================================

/// Counters for token delivery attempts
#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Individual POSTs issued
    pub attempts: AtomicU64,
    /// Individual POSTs that did not accept the token
    pub failed_attempts: AtomicU64,
    /// Deliveries acknowledged with a plain `OK`
    pub acknowledged: AtomicU64,
    /// Deliveries answered with a JSON payload
    pub payloads: AtomicU64,
    /// Deliveries where no endpoint accepted the token
    pub exhausted: AtomicU64,
}

impl DeliveryStats {
    #[inline]
    pub fn record_attempt(&self, accepted: bool) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            payloads: self.payloads.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DeliveryStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStatsSnapshot {
    pub attempts: u64,
    pub failed_attempts: u64,
    pub acknowledged: u64,
    pub payloads: u64,
    pub exhausted: u64,
}

// =============================================================================
// Poll Stats
// =============================================================================

/// Counters for recipe polling
#[derive(Debug, Default)]
pub struct PollStats {
    /// Poll ticks elapsed across all waits
    pub ticks: AtomicU64,
    /// Recipe queries issued
    pub queries: AtomicU64,
    /// Recipes observed as completed
    pub completed: AtomicU64,
    /// Recipes observed in a terminal failure state, or whose query failed
    pub failed: AtomicU64,
    /// Recipes abandoned because the local budget ran out
    pub timed_out: AtomicU64,
    /// Observed state changes that move a recipe backwards
    pub regressions: AtomicU64,
}

impl PollStats {
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PollStatsSnapshot {
        PollStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            regressions: self.regressions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PollStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatsSnapshot {
    pub ticks: u64,
    pub queries: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub regressions: u64,
}
