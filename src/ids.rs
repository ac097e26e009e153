//! Transaction identifiers and their generators

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a global, local or parent transaction
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Box<str>);

impl TxId {
    /// Create a transaction ID from any string-like value
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the ID carries no characters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TxId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for TxId {
    fn from(id: String) -> Self {
        Self(id.into_boxed_str())
    }
}

impl AsRef<str> for TxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of process-unique transaction identifiers
pub trait IdentityGenerator: Send + Sync + 'static {
    /// Produce an identifier never returned before in this process
    fn new_id(&self) -> TxId;
}

/// Random v4 UUIDs
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdentityGenerator for UuidGenerator {
    fn new_id(&self) -> TxId {
        TxId::from(uuid::Uuid::new_v4().to_string())
    }
}

/// Counter-based identifiers of the form `<prefix>-<n>`.
///
/// Deterministic, which makes event trails easy to assert on.
pub struct SequentialGenerator {
    prefix: Box<str>,
    counter: AtomicU64,
}

impl SequentialGenerator {
    /// Counter starting at 1
    pub fn new(prefix: impl Into<Box<str>>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(1),
        }
    }
}

impl IdentityGenerator for SequentialGenerator {
    fn new_id(&self) -> TxId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        TxId::from(format!("{}-{}", self.prefix, n))
    }
}
