//! Typestate states for sub-transactions

/// Sealing traits for the typestate parameter
pub mod markers {
    /// Any sub-transaction state
    pub trait TxState: Send + 'static {}
    /// A state no further event can follow
    pub trait TerminalState: TxState {}
}

// State types

/// Started, no terminal event yet
pub struct Active {
    pub(crate) started_at_millis: u64,
}

/// Business call succeeded
pub struct Ended {
    pub(crate) started_at_millis: u64,
    pub(crate) ended_at_millis: u64,
}

/// Business call failed
pub struct Aborted {
    pub(crate) aborted_at_millis: u64,
    pub(crate) reason: Box<str>,
}

impl Active {
    /// Wall-clock time of the Started event
    pub fn started_at_millis(&self) -> u64 {
        self.started_at_millis
    }
}

impl Ended {
    /// Wall-clock time of the Started event
    pub fn started_at_millis(&self) -> u64 {
        self.started_at_millis
    }

    /// Wall-clock time of the Ended event
    pub fn ended_at_millis(&self) -> u64 {
        self.ended_at_millis
    }
}

impl Aborted {
    /// Wall-clock time of the Aborted event
    pub fn aborted_at_millis(&self) -> u64 {
        self.aborted_at_millis
    }

    /// Rendered business error
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl markers::TxState for Active {}
impl markers::TxState for Ended {}
impl markers::TxState for Aborted {}

impl markers::TerminalState for Ended {}
impl markers::TerminalState for Aborted {}

use crate::{CompensationMethod, TxId};

/// One sub-transaction between `begin` and its terminal event.
///
/// Only [`TransactionContext::begin`](crate::TransactionContext::begin) creates
/// an `Active` value, and `end` / `fail` consume it, so a local transaction
/// can never emit two terminal events.
#[must_use = "an active sub-transaction must be ended or failed"]
pub struct SubTransaction<S: markers::TxState> {
    global_tx_id: TxId,
    local_tx_id: TxId,
    parent_tx_id: TxId,
    compensation_method: CompensationMethod,
    state: S,
}

impl<S: markers::TxState> SubTransaction<S> {
    /// Global transaction this call belongs to
    pub fn global_tx_id(&self) -> &TxId {
        &self.global_tx_id
    }

    /// This call's local transaction
    pub fn local_tx_id(&self) -> &TxId {
        &self.local_tx_id
    }

    /// The caller's local transaction
    pub fn parent_tx_id(&self) -> &TxId {
        &self.parent_tx_id
    }

    /// Key of the registered undo action
    pub fn compensation_method(&self) -> &CompensationMethod {
        &self.compensation_method
    }

    /// State payload
    pub fn state(&self) -> &S {
        &self.state
    }
}

impl SubTransaction<Active> {
    pub(crate) fn start(
        global_tx_id: TxId,
        local_tx_id: TxId,
        parent_tx_id: TxId,
        compensation_method: CompensationMethod,
        now_millis: u64,
    ) -> Self {
        Self {
            global_tx_id,
            local_tx_id,
            parent_tx_id,
            compensation_method,
            state: Active {
                started_at_millis: now_millis,
            },
        }
    }

    pub(crate) fn end(self, now_millis: u64) -> SubTransaction<Ended> {
        SubTransaction {
            global_tx_id: self.global_tx_id,
            local_tx_id: self.local_tx_id,
            parent_tx_id: self.parent_tx_id,
            compensation_method: self.compensation_method,
            state: Ended {
                started_at_millis: self.state.started_at_millis,
                ended_at_millis: now_millis,
            },
        }
    }

    pub(crate) fn abort(self, reason: Box<str>, now_millis: u64) -> SubTransaction<Aborted> {
        SubTransaction {
            global_tx_id: self.global_tx_id,
            local_tx_id: self.local_tx_id,
            parent_tx_id: self.parent_tx_id,
            compensation_method: self.compensation_method,
            state: Aborted {
                aborted_at_millis: now_millis,
                reason,
            },
        }
    }
}

impl SubTransaction<Ended> {
    /// Time spent between Started and Ended
    pub fn duration_millis(&self) -> u64 {
        self.state.ended_at_millis.saturating_sub(self.state.started_at_millis)
    }
}

impl<S: markers::TxState> std::fmt::Debug for SubTransaction<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubTransaction")
            .field("global_tx_id", &self.global_tx_id)
            .field("local_tx_id", &self.local_tx_id)
            .field("parent_tx_id", &self.parent_tx_id)
            .field("compensation_method", &self.compensation_method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_carry_identity_and_timing() {
        let tx = SubTransaction::start("G1".into(), "L1".into(), "G1".into(), "delete(User)".into(), 100);
        assert_eq!(tx.state().started_at_millis(), 100);

        let ended = tx.end(130);
        assert_eq!(ended.local_tx_id().as_str(), "L1");
        assert_eq!(ended.duration_millis(), 30);

        let aborted = SubTransaction::start("G1".into(), "L2".into(), "L1".into(), "m".into(), 5)
            .abort("boom".into(), 9);
        assert_eq!(aborted.parent_tx_id().as_str(), "L1");
        assert_eq!(aborted.state().reason(), "boom");
        assert_eq!(aborted.state().aborted_at_millis(), 9);
    }
}
