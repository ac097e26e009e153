//! Ordered event trail and compensation replay

use crate::{
    CompensationMethod, CompensationOutcome, EventType, MessageHandler, MessageSender, Payload,
    SendError, TxEvent, TxId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Journal storage trait
pub trait TxJournal: Send + Sync + 'static {
    /// Record an event, returning its sequence number
    fn append(&self, event: &TxEvent) -> Result<u64, JournalError>;
    /// Entries of one global transaction in append order
    fn read(&self, global_tx_id: &TxId) -> Result<Vec<JournalEntry>, JournalError>;
    /// Every global transaction with at least one entry
    fn list_global_txs(&self) -> Result<Vec<TxId>, JournalError>;
}

/// One recorded event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Journal-wide, strictly increasing
    pub sequence: u64,
    /// Wall-clock time of the append
    pub recorded_at_millis: u64,
    /// The event as emitted
    pub event: TxEvent,
}

/// Journal failures
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Backend could not read or write
    #[error("Storage error: {0}")]
    Storage(Box<str>),
}

/// In-memory journal for testing
pub struct InMemoryJournal {
    data: std::sync::RwLock<HashMap<TxId, Vec<JournalEntry>>>,
    counter: std::sync::atomic::AtomicU64,
}

impl InMemoryJournal {
    /// Empty journal
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(HashMap::new()),
            counter: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl TxJournal for InMemoryJournal {
    fn append(&self, event: &TxEvent) -> Result<u64, JournalError> {
        let mut data = self.data.write().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        // sequence taken under the lock so per-transaction order matches it
        let seq = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let entry = JournalEntry {
            sequence: seq,
            recorded_at_millis: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            event: event.clone(),
        };
        data.entry(event.global_tx_id().clone()).or_default().push(entry);

        Ok(seq)
    }

    fn read(&self, global_tx_id: &TxId) -> Result<Vec<JournalEntry>, JournalError> {
        let data = self.data.read().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.get(global_tx_id).cloned().unwrap_or_default())
    }

    fn list_global_txs(&self) -> Result<Vec<TxId>, JournalError> {
        let data = self.data.read().map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.keys().cloned().collect())
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// [`MessageSender`] appending every event to a journal
pub struct JournalSender {
    journal: Arc<dyn TxJournal>,
}

impl JournalSender {
    /// Sender appending to `journal`
    pub fn new(journal: Arc<dyn TxJournal>) -> Self {
        Self { journal }
    }
}

impl MessageSender for JournalSender {
    fn send(&self, event: &TxEvent) -> Result<(), SendError> {
        self.journal
            .append(event)
            .map(|_| ())
            .map_err(|e| SendError::Delivery(e.to_string().into()))
    }
}

/// One compensation the coordinator owes a participant
#[derive(Clone, Debug, PartialEq)]
pub struct CompensationTrigger {
    /// Global transaction being rolled back
    pub global_tx_id: TxId,
    /// Committed sub-transaction to undo
    pub local_tx_id: TxId,
    /// Undo action key from its Started event
    pub compensation_method: CompensationMethod,
    /// Arguments from its Started event
    pub payloads: Vec<Payload>,
}

/// Derive the compensations owed for one global transaction.
///
/// Only sub-transactions that reached Ended are included; aborted or still
/// running ones committed nothing. Triggers come back in reverse completion
/// order, carrying the payloads recorded on Started.
pub fn compensation_plan(entries: &[JournalEntry]) -> Vec<CompensationTrigger> {
    let mut order: Vec<TxId> = Vec::new();
    let mut rebuilt: HashMap<TxId, Rebuilt> = HashMap::new();

    for entry in entries {
        let event = &entry.event;
        let local_tx_id = event.local_tx_id();
        match event.event_type() {
            EventType::Started => {
                if !rebuilt.contains_key(local_tx_id) {
                    order.push(local_tx_id.clone());
                }
                rebuilt.insert(
                    local_tx_id.clone(),
                    Rebuilt {
                        state: RebuiltState::Running,
                        started: event.clone(),
                        ended_at_sequence: 0,
                    },
                );
            }
            EventType::Ended => {
                if let Some(sub) = rebuilt.get_mut(local_tx_id) {
                    sub.state = RebuiltState::Committed;
                    sub.ended_at_sequence = entry.sequence;
                }
            }
            EventType::Aborted => {
                if let Some(sub) = rebuilt.get_mut(local_tx_id) {
                    sub.state = RebuiltState::Aborted;
                }
            }
        }
    }

    let mut committed: Vec<&Rebuilt> = order
        .iter()
        .filter_map(|id| rebuilt.get(id))
        .filter(|sub| sub.state == RebuiltState::Committed)
        .collect();
    committed.sort_by(|a, b| b.ended_at_sequence.cmp(&a.ended_at_sequence));

    committed
        .into_iter()
        .map(|sub| CompensationTrigger {
            global_tx_id: sub.started.global_tx_id().clone(),
            local_tx_id: sub.started.local_tx_id().clone(),
            compensation_method: sub.started.compensation_method().clone(),
            payloads: sub.started.payloads().to_vec(),
        })
        .collect()
}

/// Feed the compensation plan of `global_tx_id` into a handler, newest first
pub fn replay_compensations(
    journal: &dyn TxJournal,
    global_tx_id: &TxId,
    handler: &dyn MessageHandler,
) -> Result<Vec<CompensationOutcome>, JournalError> {
    let entries = journal.read(global_tx_id)?;
    let plan = compensation_plan(&entries);
    tracing::info!(global_tx_id = %global_tx_id, triggers = plan.len(), "Replaying compensations");

    Ok(plan
        .iter()
        .map(|trigger| {
            handler.on_receive(
                &trigger.global_tx_id,
                &trigger.local_tx_id,
                &trigger.compensation_method,
                &trigger.payloads,
            )
        })
        .collect())
}

struct Rebuilt {
    state: RebuiltState,
    started: TxEvent,
    ended_at_sequence: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RebuiltState {
    Running,
    Committed,
    Aborted,
}
