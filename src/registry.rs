//! Registry of compensations awaiting a possible trigger
//!
//! Each entry moves from Registered to exactly one terminal state: Compensated
//! (taken by a trigger) or Released (dropped because the sub-transaction
//! aborted or its global transaction concluded). Terminal entries stay behind
//! as tombstones until [`CompensationRegistry::release_global`], so a local
//! transaction ID can never start a second lifecycle. State changes happen
//! under the shard lock, so concurrent triggers for the same key race for a
//! single winner.

use crate::{CompensationAction, CompensationKey, CompensationMethod, ContextError, TxId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// An action bound to one sub-transaction
#[derive(Clone)]
pub struct RegisteredCompensation {
    /// Method key the action was resolved from
    pub method: CompensationMethod,
    /// Undo action to run on a trigger
    pub action: CompensationAction,
    /// Wall-clock time of registration
    pub registered_at_millis: u64,
}

impl std::fmt::Debug for RegisteredCompensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredCompensation")
            .field("method", &self.method)
            .field("registered_at_millis", &self.registered_at_millis)
            .finish()
    }
}

/// Result of [`CompensationRegistry::take_for`]
#[derive(Debug)]
pub enum Take {
    /// The caller now exclusively owns the entry
    Taken(RegisteredCompensation),
    /// Nothing registered: already compensated, released or never started
    Missing,
    /// Registered under a different method; the entry was left in place
    MethodMismatch(CompensationMethod),
}

enum Slot {
    Pending(RegisteredCompensation),
    Finished,
}

impl Slot {
    fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending(_))
    }
}

/// Concurrent `(global_tx_id, local_tx_id) -> compensation` store
#[derive(Default)]
pub struct CompensationRegistry {
    entries: DashMap<CompensationKey, Slot>,
}

impl CompensationRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the compensation for a sub-transaction.
    ///
    /// An existing entry is never overwritten: a second Started for the same
    /// local transaction is a protocol violation, whether the first one is
    /// still pending or already finished.
    pub fn register(
        &self,
        global_tx_id: &TxId,
        local_tx_id: &TxId,
        method: CompensationMethod,
        action: CompensationAction,
    ) -> Result<(), ContextError> {
        let key = CompensationKey::new(global_tx_id.clone(), local_tx_id.clone());
        match self.entries.entry(key) {
            Entry::Occupied(slot) if slot.get().is_pending() => Err(ContextError::DuplicateRegistration {
                global_tx_id: global_tx_id.clone(),
                local_tx_id: local_tx_id.clone(),
            }),
            Entry::Occupied(_) => Err(ContextError::LocalTxIdReused {
                global_tx_id: global_tx_id.clone(),
                local_tx_id: local_tx_id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Pending(RegisteredCompensation {
                    method,
                    action,
                    registered_at_millis: now_millis(),
                }));
                Ok(())
            }
        }
    }

    /// Atomically take the entry; only one caller ever gets it
    pub fn take(&self, global_tx_id: &TxId, local_tx_id: &TxId) -> Option<RegisteredCompensation> {
        let key = CompensationKey::new(global_tx_id.clone(), local_tx_id.clone());
        let mut slot = self.entries.get_mut(&key)?;
        match std::mem::replace(&mut *slot, Slot::Finished) {
            Slot::Pending(entry) => Some(entry),
            Slot::Finished => None,
        }
    }

    /// Compare-and-take: take the entry only if it was registered for `method`
    pub fn take_for(
        &self,
        global_tx_id: &TxId,
        local_tx_id: &TxId,
        method: &CompensationMethod,
    ) -> Take {
        let key = CompensationKey::new(global_tx_id.clone(), local_tx_id.clone());
        let Some(mut slot) = self.entries.get_mut(&key) else {
            return Take::Missing;
        };
        let mismatch = match &*slot {
            Slot::Pending(entry) if &entry.method != method => Some(entry.method.clone()),
            Slot::Pending(_) => None,
            Slot::Finished => return Take::Missing,
        };
        if let Some(registered) = mismatch {
            return Take::MethodMismatch(registered);
        }
        match std::mem::replace(&mut *slot, Slot::Finished) {
            Slot::Pending(entry) => Take::Taken(entry),
            Slot::Finished => Take::Missing,
        }
    }

    /// Put back an entry taken for a compensation that can be retried.
    ///
    /// Returns false if the global transaction was released in the meantime.
    pub fn restore(&self, key: CompensationKey, entry: RegisteredCompensation) -> bool {
        match self.entries.get_mut(&key) {
            Some(mut slot) if !slot.is_pending() => {
                *slot = Slot::Pending(entry);
                true
            }
            _ => false,
        }
    }

    /// Mark the entry of a sub-transaction that will not be compensated
    pub fn release(&self, global_tx_id: &TxId, local_tx_id: &TxId) -> bool {
        self.take(global_tx_id, local_tx_id).is_some()
    }

    /// Forget everything about a concluded global transaction, tombstones
    /// included. Returns how many pending entries were dropped.
    pub fn release_global(&self, global_tx_id: &TxId) -> usize {
        let mut released = 0;
        self.entries.retain(|key, slot| {
            if !key.belongs_to(global_tx_id) {
                return true;
            }
            if slot.is_pending() {
                released += 1;
            }
            false
        });
        released
    }

    /// Keys still registered under a global transaction
    pub fn pending(&self, global_tx_id: &TxId) -> Vec<CompensationKey> {
        self.entries
            .iter()
            .filter(|entry| entry.value().is_pending() && entry.key().belongs_to(global_tx_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// True while the sub-transaction can still be compensated
    pub fn contains(&self, global_tx_id: &TxId, local_tx_id: &TxId) -> bool {
        self.entries
            .get(&CompensationKey::new(global_tx_id.clone(), local_tx_id.clone()))
            .is_some_and(|slot| slot.is_pending())
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.value().is_pending()).count()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
