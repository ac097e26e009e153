//! Error types for transaction context, compensation and transport

use crate::{CompensationMethod, TxId};
use serde::{Deserialize, Serialize};

/// Protocol violations surfaced to the interceptor boundary.
///
/// These indicate broken nesting upstream and are never swallowed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// A transaction ID was set to the empty string
    #[error("{field} must not be empty")]
    EmptyId {
        /// Which identity field was rejected
        field: &'static str,
    },
    /// `begin` was called before a global transaction ID was set
    #[error("no global transaction id in context")]
    MissingGlobalTxId,
    /// `begin` was called before a local transaction ID was set
    #[error("no local transaction id in context")]
    MissingLocalTxId,
    /// No action is known for the requested compensation method
    #[error("unknown compensation method: {0}")]
    UnknownCompensationMethod(CompensationMethod),
    /// A second Started for the same local transaction
    #[error("compensation already registered for {global_tx_id}:{local_tx_id}")]
    DuplicateRegistration {
        /// Global transaction of the rejected registration
        global_tx_id: TxId,
        /// Local transaction of the rejected registration
        local_tx_id: TxId,
    },
    /// The local transaction already reached a terminal state and its ID may
    /// not start another sub-transaction
    #[error("local transaction {global_tx_id}:{local_tx_id} already finished")]
    LocalTxIdReused {
        /// Global transaction of the rejected registration
        global_tx_id: TxId,
        /// The finished local transaction
        local_tx_id: TxId,
    },
    /// Strict mode: compensation requested for a sub-transaction never registered
    #[error("no compensation registered for {global_tx_id}:{local_tx_id}")]
    CompensationNotRegistered {
        /// Global transaction of the trigger
        global_tx_id: TxId,
        /// Local transaction of the trigger
        local_tx_id: TxId,
    },
}

/// Error from compensation execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CompensationError {
    /// Safe to retry - no side effects were applied
    #[error("compensation failed (safe to retry): {reason}")]
    SafeToRetry {
        /// Error description
        reason: Box<str>,
    },
    /// Ambiguous state - compensation may or may not have applied
    #[error("compensation outcome ambiguous: {reason}")]
    Ambiguous {
        /// Error description
        reason: Box<str>,
    },
    /// Terminal failure - cannot compensate
    #[error("compensation failed: {reason}")]
    Terminal {
        /// Error description
        reason: Box<str>,
    },
}

impl CompensationError {
    /// Check if safe to retry
    pub fn is_safe_to_retry(&self) -> bool {
        matches!(self, Self::SafeToRetry { .. })
    }

    /// Check if state is ambiguous
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }

    /// Error description
    pub fn reason(&self) -> &str {
        match self {
            Self::SafeToRetry { reason } | Self::Ambiguous { reason } | Self::Terminal { reason } => {
                reason
            }
        }
    }
}

/// Transport failure reported by a [`MessageSender`](crate::MessageSender)
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The event could not be encoded
    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),
    /// The sink rejected or lost the event
    #[error("delivery failed: {0}")]
    Delivery(Box<str>),
}

/// Wire encoding errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A mandatory key field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// The event type tag is not recognised
    #[error("unknown event type tag: {0}")]
    UnknownEventType(Box<str>),
    /// A text frame was not valid UTF-8
    #[error("invalid utf-8 in text frame: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// A field contains a malformed percent escape
    #[error("invalid escape sequence in field: {0}")]
    InvalidEscape(Box<str>),
    /// Binary archive could not be produced or validated
    #[error("archive error: {0}")]
    Archive(Box<str>),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid JSON for the config schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The service name was blank
    #[error("service_name must not be empty")]
    EmptyServiceName,
}
