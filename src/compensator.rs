//! Participant runtime wiring the context, registry and channels together

use crate::{
    CompensationCatalog, CompensationDispatcher, CompensationError, CompensationMethod,
    CompensationRegistry, CompensatorConfig, CompensatorStats, CompensatorStatsSnapshot,
    ConfigError, EncodingSender, EventChannel, FrameSink, IdentityGenerator, MessageSender,
    Payload, TracingObserver, TransactionContext, TxId, TxObserver, TxPropagation, UuidGenerator,
};
use std::sync::Arc;

/// Shared state behind every context of one participant
pub(crate) struct Runtime {
    pub(crate) config: CompensatorConfig,
    pub(crate) ids: Arc<dyn IdentityGenerator>,
    pub(crate) catalog: CompensationCatalog,
    pub(crate) registry: Arc<CompensationRegistry>,
    pub(crate) channel: EventChannel,
    pub(crate) dispatcher: CompensationDispatcher,
}

impl Runtime {
    pub(crate) fn release_global(&self, global_tx_id: &TxId) -> usize {
        let released = self.registry.release_global(global_tx_id);
        if released > 0 {
            tracing::debug!(global_tx_id = %global_tx_id, released, "Released pending compensations");
        }
        let stats = self.channel.stats();
        for _ in 0..released {
            CompensatorStats::incr(&stats.compensations_released);
        }
        released
    }
}

/// Compensation engine of one participant service.
///
/// Cheap to clone; every clone shares the same registry, so contexts created
/// on any thread register into the store that [`dispatcher`](Self::dispatcher)
/// drains.
///
/// ```rust,ignore
/// let compensator = Compensator::builder(Arc::new(KafkaSender::new(producer)))
///     .compensation("UserService::delete(User)", move |payloads| {
///         let user: User = payload_as(payloads, 0)?;
///         repository.delete(&user.id);
///         Ok(())
///     })
///     .build()?;
///
/// let mut ctx = compensator.join(propagation);
/// let user = ctx.transactional("UserService::delete(User)", vec![json!(user)], |_| {
///     repository.save(user)
/// })??;
/// ```
#[derive(Clone)]
pub struct Compensator {
    runtime: Arc<Runtime>,
}

impl Compensator {
    /// Start assembling a participant that hands events to `sender`
    pub fn builder(sender: Arc<dyn MessageSender>) -> CompensatorBuilder {
        Self::builder_with(Transport::Events(sender))
    }

    /// Start assembling a participant whose events are encoded in the
    /// configured [`WireFormat`](crate::WireFormat) and handed to `sink`
    pub fn framed(sink: Arc<dyn FrameSink>) -> CompensatorBuilder {
        Self::builder_with(Transport::Frames(sink))
    }

    fn builder_with(transport: Transport) -> CompensatorBuilder {
        CompensatorBuilder {
            transport,
            ids: Arc::new(UuidGenerator),
            observer: Arc::new(TracingObserver),
            config: CompensatorConfig::default(),
            catalog: CompensationCatalog::new(),
        }
    }

    /// Context with no identity; the caller sets the IDs
    pub fn context(&self) -> TransactionContext {
        TransactionContext::new(self.runtime.clone())
    }

    /// Context for a new global transaction rooted here
    pub fn root_context(&self) -> TransactionContext {
        let global_tx_id = self.runtime.ids.new_id();
        let local_tx_id = self.runtime.ids.new_id();
        TransactionContext::with_ids(self.runtime.clone(), global_tx_id.clone(), local_tx_id, global_tx_id)
    }

    /// Context for a call received from an upstream participant
    pub fn join(&self, propagation: TxPropagation) -> TransactionContext {
        TransactionContext::with_ids(
            self.runtime.clone(),
            propagation.global_tx_id,
            self.runtime.ids.new_id(),
            propagation.parent_tx_id,
        )
    }

    /// Inbound [`MessageHandler`](crate::MessageHandler) for compensation triggers
    pub fn dispatcher(&self) -> CompensationDispatcher {
        self.runtime.dispatcher.clone()
    }

    /// Pending compensations of this participant
    pub fn registry(&self) -> &Arc<CompensationRegistry> {
        &self.runtime.registry
    }

    /// Drop every pending compensation of a global transaction that concluded
    /// successfully
    pub fn release_global(&self, global_tx_id: &TxId) -> usize {
        self.runtime.release_global(global_tx_id)
    }

    /// Settings the participant was built with
    pub fn config(&self) -> &CompensatorConfig {
        &self.runtime.config
    }

    /// Point-in-time copy of the counters
    pub fn stats(&self) -> CompensatorStatsSnapshot {
        self.runtime.channel.stats().snapshot()
    }
}

impl std::fmt::Debug for Compensator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compensator")
            .field("service_name", &self.runtime.config.service_name)
            .field("catalog", &self.runtime.catalog)
            .field("pending", &self.runtime.registry.len())
            .finish()
    }
}

enum Transport {
    Events(Arc<dyn MessageSender>),
    Frames(Arc<dyn FrameSink>),
}

/// Assembles a [`Compensator`]
pub struct CompensatorBuilder {
    transport: Transport,
    ids: Arc<dyn IdentityGenerator>,
    observer: Arc<dyn TxObserver>,
    config: CompensatorConfig,
    catalog: CompensationCatalog,
}

impl CompensatorBuilder {
    /// Replace the default [`UuidGenerator`]
    pub fn id_generator(mut self, ids: impl IdentityGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Replace the default [`TracingObserver`]
    pub fn observer(mut self, observer: impl TxObserver) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Use `config` instead of the defaults
    pub fn config(mut self, config: CompensatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind an undo action to a compensation method key
    pub fn compensation<F>(mut self, method: impl Into<CompensationMethod>, action: F) -> Self
    where
        F: Fn(&[Payload]) -> Result<(), CompensationError> + Send + Sync + 'static,
    {
        self.catalog.register(method, action);
        self
    }

    /// Replace the catalog wholesale
    pub fn catalog(mut self, catalog: CompensationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Validate the configuration and wire everything together
    pub fn build(self) -> Result<Compensator, ConfigError> {
        self.config.validate()?;

        let sender: Arc<dyn MessageSender> = match self.transport {
            Transport::Events(sender) => sender,
            Transport::Frames(sink) => Arc::new(EncodingSender::new(self.config.wire_format, sink)),
        };
        let stats = Arc::new(CompensatorStats::new());
        let registry = Arc::new(CompensationRegistry::new());
        let channel = EventChannel::new(sender, self.observer.clone(), stats.clone());
        let dispatcher = CompensationDispatcher::new(registry.clone(), self.observer, stats);

        tracing::debug!(
            service = %self.config.service_name,
            methods = self.catalog.len(),
            wire_format = ?self.config.wire_format,
            "Compensator ready"
        );

        Ok(Compensator {
            runtime: Arc::new(Runtime {
                config: self.config,
                ids: self.ids,
                catalog: self.catalog,
                registry,
                channel,
                dispatcher,
            }),
        })
    }
}
