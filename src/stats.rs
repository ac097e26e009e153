//! Compensator statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-participant statistics
pub struct CompensatorStats {
    /// Events accepted by the sender
    pub events_sent: AtomicU64,
    /// Events the sender rejected
    pub send_failures: AtomicU64,
    /// Started events emitted
    pub sub_transactions_started: AtomicU64,
    /// Ended events emitted
    pub sub_transactions_ended: AtomicU64,
    /// Aborted events emitted
    pub sub_transactions_aborted: AtomicU64,
    /// Compensations registered by `begin`
    pub compensations_registered: AtomicU64,
    /// Registrations dropped without running
    pub compensations_released: AtomicU64,
    /// Compensation actions that succeeded
    pub compensations_executed: AtomicU64,
    /// Compensation actions that returned an error
    pub compensations_failed: AtomicU64,
    /// Triggers with nothing to run, including method mismatches
    pub triggers_ignored: AtomicU64,
}

impl CompensatorStats {
    /// All counters at zero
    pub fn new() -> Self {
        Self {
            events_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            sub_transactions_started: AtomicU64::new(0),
            sub_transactions_ended: AtomicU64::new(0),
            sub_transactions_aborted: AtomicU64::new(0),
            compensations_registered: AtomicU64::new(0),
            compensations_released: AtomicU64::new(0),
            compensations_executed: AtomicU64::new(0),
            compensations_failed: AtomicU64::new(0),
            triggers_ignored: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter
    pub fn snapshot(&self) -> CompensatorStatsSnapshot {
        CompensatorStatsSnapshot {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            sub_transactions_started: self.sub_transactions_started.load(Ordering::Relaxed),
            sub_transactions_ended: self.sub_transactions_ended.load(Ordering::Relaxed),
            sub_transactions_aborted: self.sub_transactions_aborted.load(Ordering::Relaxed),
            compensations_registered: self.compensations_registered.load(Ordering::Relaxed),
            compensations_released: self.compensations_released.load(Ordering::Relaxed),
            compensations_executed: self.compensations_executed.load(Ordering::Relaxed),
            compensations_failed: self.compensations_failed.load(Ordering::Relaxed),
            triggers_ignored: self.triggers_ignored.load(Ordering::Relaxed),
        }
    }
}

impl Default for CompensatorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`CompensatorStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompensatorStatsSnapshot {
    /// Events accepted by the sender
    pub events_sent: u64,
    /// Events the sender rejected
    pub send_failures: u64,
    /// Started events emitted
    pub sub_transactions_started: u64,
    /// Ended events emitted
    pub sub_transactions_ended: u64,
    /// Aborted events emitted
    pub sub_transactions_aborted: u64,
    /// Compensations registered by `begin`
    pub compensations_registered: u64,
    /// Registrations dropped without running
    pub compensations_released: u64,
    /// Compensation actions that succeeded
    pub compensations_executed: u64,
    /// Compensation actions that returned an error
    pub compensations_failed: u64,
    /// Triggers with nothing to run, including method mismatches
    pub triggers_ignored: u64,
}
