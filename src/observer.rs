//! Transaction observer trait

use crate::{CompensationKey, CompensationMethod, TxEvent};

/// Observer trait for external observability
pub trait TxObserver: Send + Sync + 'static {
    /// A Started event was emitted
    fn on_started(&self, event: &TxEvent);
    /// An Ended event was emitted
    fn on_ended(&self, event: &TxEvent);
    /// An Aborted event was emitted; `reason` is the rendered business error
    fn on_aborted(&self, event: &TxEvent, reason: &str);
    /// The sender rejected an event
    fn on_send_failed(&self, event: &TxEvent, error: &str);
    /// A trigger ran its compensation successfully
    fn on_compensated(&self, key: &CompensationKey, method: &CompensationMethod);
    /// A trigger found nothing to compensate
    fn on_compensation_skipped(&self, key: &CompensationKey, method: &CompensationMethod);
    /// A compensation action returned an error
    fn on_compensation_failed(&self, key: &CompensationKey, method: &CompensationMethod, error: &str);
}

/// No-op observer
pub struct NoOpObserver;

impl TxObserver for NoOpObserver {
    fn on_started(&self, _event: &TxEvent) {}
    fn on_ended(&self, _event: &TxEvent) {}
    fn on_aborted(&self, _event: &TxEvent, _reason: &str) {}
    fn on_send_failed(&self, _event: &TxEvent, _error: &str) {}
    fn on_compensated(&self, _key: &CompensationKey, _method: &CompensationMethod) {}
    fn on_compensation_skipped(&self, _key: &CompensationKey, _method: &CompensationMethod) {}
    fn on_compensation_failed(&self, _key: &CompensationKey, _method: &CompensationMethod, _error: &str) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl TxObserver for TracingObserver {
    fn on_started(&self, event: &TxEvent) {
        tracing::info!(
            global_tx_id = %event.global_tx_id(),
            local_tx_id = %event.local_tx_id(),
            parent_tx_id = %event.parent_tx_id(),
            method = %event.compensation_method(),
            "Sub-transaction started"
        );
    }

    fn on_ended(&self, event: &TxEvent) {
        tracing::info!(global_tx_id = %event.global_tx_id(), local_tx_id = %event.local_tx_id(), "Sub-transaction ended");
    }

    fn on_aborted(&self, event: &TxEvent, reason: &str) {
        tracing::warn!(global_tx_id = %event.global_tx_id(), local_tx_id = %event.local_tx_id(), reason = %reason, "Sub-transaction aborted");
    }

    fn on_send_failed(&self, event: &TxEvent, error: &str) {
        tracing::warn!(
            global_tx_id = %event.global_tx_id(),
            local_tx_id = %event.local_tx_id(),
            event_type = %event.event_type(),
            error = %error,
            "Event delivery failed"
        );
    }

    fn on_compensated(&self, key: &CompensationKey, method: &CompensationMethod) {
        tracing::info!(global_tx_id = %key.global_tx_id, local_tx_id = %key.local_tx_id, method = %method, "Compensation completed");
    }

    fn on_compensation_skipped(&self, key: &CompensationKey, method: &CompensationMethod) {
        tracing::debug!(global_tx_id = %key.global_tx_id, local_tx_id = %key.local_tx_id, method = %method, "No compensation registered");
    }

    fn on_compensation_failed(&self, key: &CompensationKey, method: &CompensationMethod, error: &str) {
        tracing::error!(global_tx_id = %key.global_tx_id, local_tx_id = %key.local_tx_id, method = %method, error = %error, "Compensation failed");
    }
}
