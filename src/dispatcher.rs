//! Inbound compensation triggers

use crate::{
    CompensationError, CompensationKey, CompensationMethod, CompensationRegistry,
    CompensatorStats, Payload, Take, TxId, TxObserver,
};
use std::sync::Arc;

/// Entry point for compensation triggers replayed by the coordinator.
///
/// Safe to call from any thread, any number of times and in any order
/// relative to sibling sub-transactions.
pub trait MessageHandler: Send + Sync + 'static {
    /// Run the compensation registered for `(global_tx_id, local_tx_id)`,
    /// if any
    fn on_receive(
        &self,
        global_tx_id: &TxId,
        local_tx_id: &TxId,
        compensation_method: &CompensationMethod,
        payloads: &[Payload],
    ) -> CompensationOutcome;
}

/// What a trigger did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// The registered action ran and the registration is consumed
    Compensated,
    /// Nothing to do: already compensated, released, or never registered
    NotRegistered,
    /// The sub-transaction is registered under another method; left untouched
    MethodMismatch {
        /// Method the sub-transaction was registered with
        registered: CompensationMethod,
    },
    /// The action failed. `restored` is true when the registration was put
    /// back so that a redelivered trigger can retry.
    Failed {
        /// What the action returned
        error: CompensationError,
        /// Whether a later trigger can retry
        restored: bool,
    },
}

impl CompensationOutcome {
    /// True when the trigger executed nothing
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NotRegistered | Self::MethodMismatch { .. })
    }
}

/// [`MessageHandler`] executing registered compensations at most once
#[derive(Clone)]
pub struct CompensationDispatcher {
    registry: Arc<CompensationRegistry>,
    observer: Arc<dyn TxObserver>,
    stats: Arc<CompensatorStats>,
}

impl CompensationDispatcher {
    /// Dispatcher draining `registry`
    pub fn new(
        registry: Arc<CompensationRegistry>,
        observer: Arc<dyn TxObserver>,
        stats: Arc<CompensatorStats>,
    ) -> Self {
        Self {
            registry,
            observer,
            stats,
        }
    }
}

impl MessageHandler for CompensationDispatcher {
    fn on_receive(
        &self,
        global_tx_id: &TxId,
        local_tx_id: &TxId,
        compensation_method: &CompensationMethod,
        payloads: &[Payload],
    ) -> CompensationOutcome {
        let key = CompensationKey::new(global_tx_id.clone(), local_tx_id.clone());

        let entry = match self.registry.take_for(global_tx_id, local_tx_id, compensation_method) {
            Take::Taken(entry) => entry,
            Take::Missing => {
                CompensatorStats::incr(&self.stats.triggers_ignored);
                self.observer.on_compensation_skipped(&key, compensation_method);
                return CompensationOutcome::NotRegistered;
            }
            Take::MethodMismatch(registered) => {
                CompensatorStats::incr(&self.stats.triggers_ignored);
                tracing::warn!(
                    global_tx_id = %global_tx_id,
                    local_tx_id = %local_tx_id,
                    requested = %compensation_method,
                    registered = %registered,
                    "Compensation trigger names a different method"
                );
                return CompensationOutcome::MethodMismatch { registered };
            }
        };

        // the entry is exclusively ours now; run outside any map lock
        match (entry.action)(payloads) {
            Ok(()) => {
                CompensatorStats::incr(&self.stats.compensations_executed);
                self.observer.on_compensated(&key, compensation_method);
                CompensationOutcome::Compensated
            }
            Err(error) => {
                CompensatorStats::incr(&self.stats.compensations_failed);
                self.observer
                    .on_compensation_failed(&key, compensation_method, &error.to_string());
                let restored = error.is_safe_to_retry() && self.registry.restore(key, entry);
                CompensationOutcome::Failed { error, restored }
            }
        }
    }
}
