//! Transaction events

use crate::TxId;
use serde::{Deserialize, Serialize};

/// Argument captured for a compensation action
pub type Payload = serde_json::Value;

/// Stable symbolic key of an undo action, e.g. `UserService::delete(User)`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompensationMethod(Box<str>);

impl CompensationMethod {
    /// Create a method key
    pub fn new(method: impl Into<Box<str>>) -> Self {
        Self(method.into())
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for CompensationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompensationMethod({})", self.0)
    }
}

impl std::fmt::Display for CompensationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CompensationMethod {
    fn from(method: &str) -> Self {
        Self(method.into())
    }
}

impl From<String> for CompensationMethod {
    fn from(method: String) -> Self {
        Self(method.into_boxed_str())
    }
}

/// Lifecycle step of a sub-transaction
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub enum EventType {
    /// Sub-transaction entered; carries the compensation payloads
    Started,
    /// Sub-transaction returned normally
    Ended,
    /// Sub-transaction raised an error
    Aborted,
}

impl EventType {
    /// Tag written on the wire
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Started => "TxStartedEvent",
            Self::Ended => "TxEndedEvent",
            Self::Aborted => "TxAbortedEvent",
        }
    }

    /// Parse a wire tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "TxStartedEvent" => Some(Self::Started),
            "TxEndedEvent" => Some(Self::Ended),
            "TxAbortedEvent" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Ended and Aborted close a sub-transaction
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Immutable record of one sub-transaction lifecycle step.
///
/// Terminal events never carry payloads so that an abort signal stays minimal
/// and can be replayed freely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxEvent {
    global_tx_id: TxId,
    local_tx_id: TxId,
    parent_tx_id: TxId,
    event_type: EventType,
    compensation_method: CompensationMethod,
    payloads: Vec<Payload>,
}

impl TxEvent {
    /// Started event with the arguments needed to compensate later
    pub fn started(
        global_tx_id: TxId,
        local_tx_id: TxId,
        parent_tx_id: TxId,
        compensation_method: CompensationMethod,
        payloads: Vec<Payload>,
    ) -> Self {
        Self {
            global_tx_id,
            local_tx_id,
            parent_tx_id,
            event_type: EventType::Started,
            compensation_method,
            payloads,
        }
    }

    /// Ended event
    pub fn ended(
        global_tx_id: TxId,
        local_tx_id: TxId,
        parent_tx_id: TxId,
        compensation_method: CompensationMethod,
    ) -> Self {
        Self::terminal(EventType::Ended, global_tx_id, local_tx_id, parent_tx_id, compensation_method)
    }

    /// Aborted event
    pub fn aborted(
        global_tx_id: TxId,
        local_tx_id: TxId,
        parent_tx_id: TxId,
        compensation_method: CompensationMethod,
    ) -> Self {
        Self::terminal(EventType::Aborted, global_tx_id, local_tx_id, parent_tx_id, compensation_method)
    }

    fn terminal(
        event_type: EventType,
        global_tx_id: TxId,
        local_tx_id: TxId,
        parent_tx_id: TxId,
        compensation_method: CompensationMethod,
    ) -> Self {
        Self {
            global_tx_id,
            local_tx_id,
            parent_tx_id,
            event_type,
            compensation_method,
            payloads: Vec::new(),
        }
    }

    /// Global transaction
    pub fn global_tx_id(&self) -> &TxId {
        &self.global_tx_id
    }

    /// Sub-transaction this event belongs to
    pub fn local_tx_id(&self) -> &TxId {
        &self.local_tx_id
    }

    /// Caller's sub-transaction, or the global ID at the root
    pub fn parent_tx_id(&self) -> &TxId {
        &self.parent_tx_id
    }

    /// Lifecycle position
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Undo action key
    pub fn compensation_method(&self) -> &CompensationMethod {
        &self.compensation_method
    }

    /// Arguments captured at Started; empty for terminal events
    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }
}
