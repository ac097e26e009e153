//! Compensation actions and the catalog resolving them by method key

use crate::{CompensationError, CompensationMethod, Payload};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// Undo action invoked with the payloads of a compensation trigger
pub type CompensationAction =
    Arc<dyn Fn(&[Payload]) -> Result<(), CompensationError> + Send + Sync + 'static>;

/// Wrap a closure as a shareable [`CompensationAction`]
pub fn compensation_action<F>(action: F) -> CompensationAction
where
    F: Fn(&[Payload]) -> Result<(), CompensationError> + Send + Sync + 'static,
{
    Arc::new(action)
}

/// Maps compensation method keys to the actions that implement them.
///
/// Populated once while the participant is assembled, read-only afterwards.
///
/// ```rust,ignore
/// let mut catalog = CompensationCatalog::new();
/// catalog.register("UserService::delete(User)", move |payloads| {
///     let user: User = payload_as(payloads, 0)?;
///     repository.delete(&user.id);
///     Ok(())
/// });
/// ```
#[derive(Clone, Default)]
pub struct CompensationCatalog {
    actions: HashMap<CompensationMethod, CompensationAction>,
}

impl CompensationCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an action to a method key, replacing any previous binding
    pub fn register<F>(&mut self, method: impl Into<CompensationMethod>, action: F)
    where
        F: Fn(&[Payload]) -> Result<(), CompensationError> + Send + Sync + 'static,
    {
        self.actions.insert(method.into(), compensation_action(action));
    }

    /// Look up the action for a method key
    pub fn resolve(&self, method: &CompensationMethod) -> Option<CompensationAction> {
        self.actions.get(method).cloned()
    }

    /// True when an action is bound to `method`
    pub fn contains(&self, method: &CompensationMethod) -> bool {
        self.actions.contains_key(method)
    }

    /// Number of bound methods
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when no method is bound
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for CompensationCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationCatalog")
            .field("methods", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Decode the payload at `index` into a typed argument.
///
/// A missing or mistyped payload can never succeed on redelivery, so it is
/// reported as [`CompensationError::Terminal`].
pub fn payload_as<T: DeserializeOwned>(payloads: &[Payload], index: usize) -> Result<T, CompensationError> {
    let payload = payloads.get(index).ok_or_else(|| CompensationError::Terminal {
        reason: format!("missing payload at index {}", index).into(),
    })?;
    serde_json::from_value(payload.clone()).map_err(|e| CompensationError::Terminal {
        reason: format!("payload {} has unexpected shape: {}", index, e).into(),
    })
}
