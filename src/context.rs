//! Per-call-chain transaction context
//!
//! A [`TransactionContext`] is an explicit value threaded through the call
//! graph rather than thread-local state, so concurrent call chains (and async
//! hops between threads) never observe each other's identity fields.

use crate::compensator::Runtime;
use crate::state::{Aborted, Active, Ended, SubTransaction};
use crate::{
    CompensationKey, CompensationMethod, CompensationMode, CompensationOutcome, CompensatorStats,
    ContextError, MessageHandler, Payload, TxEvent, TxId,
};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Transaction identity of one logical call chain
pub struct TransactionContext {
    runtime: Arc<Runtime>,
    global_tx_id: Option<TxId>,
    local_tx_id: Option<TxId>,
    parent_tx_id: Option<TxId>,
}

impl TransactionContext {
    pub(crate) fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            global_tx_id: None,
            local_tx_id: None,
            parent_tx_id: None,
        }
    }

    pub(crate) fn with_ids(
        runtime: Arc<Runtime>,
        global_tx_id: TxId,
        local_tx_id: TxId,
        parent_tx_id: TxId,
    ) -> Self {
        Self {
            runtime,
            global_tx_id: Some(global_tx_id),
            local_tx_id: Some(local_tx_id),
            parent_tx_id: Some(parent_tx_id),
        }
    }

    /// Join a global transaction; rejects the empty string
    pub fn set_global_tx_id(&mut self, id: impl Into<TxId>) -> Result<(), ContextError> {
        self.global_tx_id = Some(non_empty(id.into(), "global_tx_id")?);
        Ok(())
    }

    /// Set the ID the next sub-transaction runs under; rejects the empty string
    pub fn set_local_tx_id(&mut self, id: impl Into<TxId>) -> Result<(), ContextError> {
        self.local_tx_id = Some(non_empty(id.into(), "local_tx_id")?);
        Ok(())
    }

    /// Set the caller's local transaction; rejects the empty string
    pub fn set_parent_tx_id(&mut self, id: impl Into<TxId>) -> Result<(), ContextError> {
        self.parent_tx_id = Some(non_empty(id.into(), "parent_tx_id")?);
        Ok(())
    }

    /// Current global transaction, if any
    pub fn global_tx_id(&self) -> Option<&TxId> {
        self.global_tx_id.as_ref()
    }

    /// Current local transaction, if any
    pub fn local_tx_id(&self) -> Option<&TxId> {
        self.local_tx_id.as_ref()
    }

    /// Current parent transaction, if any
    pub fn parent_tx_id(&self) -> Option<&TxId> {
        self.parent_tx_id.as_ref()
    }

    /// Fresh identifier for a sibling sub-transaction.
    ///
    /// The context is left untouched; pass the result to
    /// [`set_local_tx_id`](Self::set_local_tx_id) to issue the next call under it.
    pub fn new_local_tx_id(&self) -> TxId {
        self.runtime.ids.new_id()
    }

    /// Compensations still registered under the current global transaction,
    /// whichever context of the chain registered them
    pub fn pending_compensations(&self) -> Vec<CompensationKey> {
        match &self.global_tx_id {
            Some(global_tx_id) => self.runtime.registry.pending(global_tx_id),
            None => Vec::new(),
        }
    }

    /// Enter a sub-transaction: register its compensation, then emit Started.
    ///
    /// Uses the current global and local IDs; the parent defaults to the
    /// global ID when none was set (root call). A local ID that already
    /// started a sub-transaction is rejected until its global transaction is
    /// released.
    ///
    /// ```rust,ignore
    /// let tx = ctx.begin("UserService::delete(User)", vec![json!(user)])?;
    /// match repository.save(user) {
    ///     Ok(saved) => { ctx.end(tx); Ok(saved) }
    ///     Err(e) => { ctx.fail(tx, e.to_string()); Err(e) }
    /// }
    /// ```
    pub fn begin(
        &mut self,
        compensation_method: impl Into<CompensationMethod>,
        payloads: Vec<Payload>,
    ) -> Result<SubTransaction<Active>, ContextError> {
        let global_tx_id = self.global_tx_id.clone().ok_or(ContextError::MissingGlobalTxId)?;
        let local_tx_id = self.local_tx_id.clone().ok_or(ContextError::MissingLocalTxId)?;
        let parent_tx_id = self.parent_tx_id.clone().unwrap_or_else(|| global_tx_id.clone());
        let compensation_method = compensation_method.into();

        let action = self
            .runtime
            .catalog
            .resolve(&compensation_method)
            .ok_or_else(|| ContextError::UnknownCompensationMethod(compensation_method.clone()))?;
        self.runtime.registry.register(
            &global_tx_id,
            &local_tx_id,
            compensation_method.clone(),
            action,
        )?;

        let stats = self.runtime.channel.stats();
        CompensatorStats::incr(&stats.compensations_registered);
        CompensatorStats::incr(&stats.sub_transactions_started);

        let event = TxEvent::started(
            global_tx_id.clone(),
            local_tx_id.clone(),
            parent_tx_id.clone(),
            compensation_method.clone(),
            payloads,
        );
        self.runtime.channel.emit(&event);
        self.runtime.channel.observer().on_started(&event);

        Ok(SubTransaction::start(
            global_tx_id,
            local_tx_id,
            parent_tx_id,
            compensation_method,
            now_millis(),
        ))
    }

    /// Leave a sub-transaction normally: emit Ended.
    ///
    /// The compensation stays registered: another participant may still fail
    /// and have the coordinator replay it.
    pub fn end(&self, tx: SubTransaction<Active>) -> SubTransaction<Ended> {
        let event = TxEvent::ended(
            tx.global_tx_id().clone(),
            tx.local_tx_id().clone(),
            tx.parent_tx_id().clone(),
            tx.compensation_method().clone(),
        );
        self.runtime.channel.emit(&event);
        CompensatorStats::incr(&self.runtime.channel.stats().sub_transactions_ended);
        self.runtime.channel.observer().on_ended(&event);
        tx.end(now_millis())
    }

    /// Leave a sub-transaction with an error: emit Aborted.
    ///
    /// No local compensation runs; the decision to compensate committed
    /// siblings belongs to the coordinator. The failed sub-transaction itself
    /// never committed, so its own registration is released.
    pub fn fail(&self, tx: SubTransaction<Active>, reason: impl Into<Box<str>>) -> SubTransaction<Aborted> {
        let reason = reason.into();
        let event = TxEvent::aborted(
            tx.global_tx_id().clone(),
            tx.local_tx_id().clone(),
            tx.parent_tx_id().clone(),
            tx.compensation_method().clone(),
        );
        self.runtime.channel.emit(&event);
        let stats = self.runtime.channel.stats();
        CompensatorStats::incr(&stats.sub_transactions_aborted);
        self.runtime.channel.observer().on_aborted(&event, &reason);

        if self.runtime.registry.release(tx.global_tx_id(), tx.local_tx_id()) {
            CompensatorStats::incr(&stats.compensations_released);
        }

        tx.abort(reason, now_millis())
    }

    /// Run `op` as a sub-transaction.
    ///
    /// The business result comes back unchanged inside `Ok`; the outer `Err`
    /// only reports protocol violations detected before `op` ran. A panic in
    /// `op` emits Aborted before it resumes unwinding.
    pub fn transactional<T, E, F>(
        &mut self,
        compensation_method: impl Into<CompensationMethod>,
        payloads: Vec<Payload>,
        op: F,
    ) -> Result<Result<T, E>, ContextError>
    where
        E: std::fmt::Display,
        F: FnOnce(&mut TransactionContext) -> Result<T, E>,
    {
        let tx = self.begin(compensation_method, payloads)?;
        let span = tracing::debug_span!(
            "sub_transaction",
            service = %self.runtime.config.service_name,
            global_tx_id = %tx.global_tx_id(),
            local_tx_id = %tx.local_tx_id(),
        );
        let _entered = span.enter();

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| op(self))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let _ = self.fail(tx, "business operation panicked");
                panic::resume_unwind(payload);
            }
        };
        match outcome {
            Ok(value) => {
                let ended = self.end(tx);
                tracing::debug!(duration_ms = ended.duration_millis(), "Business operation succeeded");
                Ok(Ok(value))
            }
            Err(error) => {
                let _ = self.fail(tx, error.to_string());
                Ok(Err(error))
            }
        }
    }

    /// Trigger compensation of a sub-transaction through this participant's
    /// dispatcher.
    ///
    /// In [`CompensationMode::Lenient`] a missing registration is a no-op; in
    /// [`CompensationMode::Strict`] it is a protocol violation.
    pub fn compensate(
        &self,
        global_tx_id: &TxId,
        local_tx_id: &TxId,
        compensation_method: &CompensationMethod,
        payloads: &[Payload],
    ) -> Result<CompensationOutcome, ContextError> {
        let outcome = self
            .runtime
            .dispatcher
            .on_receive(global_tx_id, local_tx_id, compensation_method, payloads);
        if outcome == CompensationOutcome::NotRegistered
            && self.runtime.config.compensation_mode == CompensationMode::Strict
        {
            return Err(ContextError::CompensationNotRegistered {
                global_tx_id: global_tx_id.clone(),
                local_tx_id: local_tx_id.clone(),
            });
        }
        Ok(outcome)
    }

    /// Context for a callee: same global transaction, this local transaction
    /// as parent, fresh local ID. `self` is unchanged, so returning from the
    /// callee restores the caller's identity.
    pub fn nested(&self) -> Result<TransactionContext, ContextError> {
        let global_tx_id = self.global_tx_id.clone().ok_or(ContextError::MissingGlobalTxId)?;
        let parent_tx_id = self.local_tx_id.clone().ok_or(ContextError::MissingLocalTxId)?;
        Ok(Self::with_ids(
            self.runtime.clone(),
            global_tx_id,
            self.new_local_tx_id(),
            parent_tx_id,
        ))
    }

    /// Identity to hand to a remote participant
    pub fn propagation(&self) -> Result<TxPropagation, ContextError> {
        Ok(TxPropagation {
            global_tx_id: self.global_tx_id.clone().ok_or(ContextError::MissingGlobalTxId)?,
            parent_tx_id: self.local_tx_id.clone().ok_or(ContextError::MissingLocalTxId)?,
        })
    }

    /// Conclude the global transaction on this participant: every
    /// compensation registered under it, including those of nested calls, is
    /// released and the identity cleared. Returns how many were released.
    pub fn release(&mut self) -> usize {
        let released = match &self.global_tx_id {
            Some(global_tx_id) => self.runtime.release_global(global_tx_id),
            None => 0,
        };
        self.clear();
        released
    }

    /// Forget identity without touching registered compensations
    pub fn clear(&mut self) {
        self.global_tx_id = None;
        self.local_tx_id = None;
        self.parent_tx_id = None;
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("global_tx_id", &self.global_tx_id)
            .field("local_tx_id", &self.local_tx_id)
            .field("parent_tx_id", &self.parent_tx_id)
            .finish()
    }
}

/// Transaction identity carried to a downstream participant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPropagation {
    /// Global transaction shared by the whole call graph
    pub global_tx_id: TxId,
    /// The caller's local transaction, which becomes the callee's parent
    pub parent_tx_id: TxId,
}

impl TxPropagation {
    /// Header carrying the global transaction ID
    pub const GLOBAL_TX_ID_HEADER: &'static str = "X-Pack-Global-Transaction-Id";
    /// Header carrying the caller's local transaction ID
    pub const LOCAL_TX_ID_HEADER: &'static str = "X-Pack-Local-Transaction-Id";

    /// Header pairs for a transport request
    pub fn to_headers(&self) -> [(&'static str, String); 2] {
        [
            (Self::GLOBAL_TX_ID_HEADER, self.global_tx_id.to_string()),
            (Self::LOCAL_TX_ID_HEADER, self.parent_tx_id.to_string()),
        ]
    }

    /// Recover the identity from request headers (names are case-insensitive)
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<Self> {
        let mut global_tx_id = None;
        let mut parent_tx_id = None;
        for (name, value) in headers {
            if value.is_empty() {
                continue;
            }
            if name.eq_ignore_ascii_case(Self::GLOBAL_TX_ID_HEADER) {
                global_tx_id = Some(TxId::from(value));
            } else if name.eq_ignore_ascii_case(Self::LOCAL_TX_ID_HEADER) {
                parent_tx_id = Some(TxId::from(value));
            }
        }
        Some(Self {
            global_tx_id: global_tx_id?,
            parent_tx_id: parent_tx_id?,
        })
    }
}

fn non_empty(id: TxId, field: &'static str) -> Result<TxId, ContextError> {
    if id.is_empty() {
        return Err(ContextError::EmptyId { field });
    }
    Ok(id)
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
