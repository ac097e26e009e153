//! Saga Compensation Engine
//!
//! Wraps participant calls of a distributed business transaction, records how
//! to undo each one, emits an ordered `Started` / `Ended` / `Aborted` event
//! trail, and runs the recorded undo action when the coordinator replays a
//! compensation trigger.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Bind undo actions and a transport
//! let compensator = Compensator::builder(Arc::new(my_sender))
//!     .compensation("UserService::delete(User)", |payloads| {
//!         let user: User = payload_as(payloads, 0)?;
//!         repository.delete(&user.id);
//!         Ok(())
//!     })
//!     .build()?;
//!
//! // 2. Wrap each business call (the interceptor boundary)
//! let mut ctx = compensator.join(TxPropagation::from_headers(headers)?);
//! let saved = ctx.transactional("UserService::delete(User)", vec![json!(user)], |_| {
//!     repository.save(user)
//! })?;
//!
//! // 3. Route inbound compensation triggers
//! compensator.dispatcher().on_receive(&global, &local, &method, &payloads);
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod context;
mod errors;
mod events;
mod idempotency;
mod ids;
mod state;

// === Wire ===
mod codec;
mod sender;

// === Compensation ===
mod catalog;
mod dispatcher;
mod registry;

// === Storage ===
mod journal;

// === Runtime ===
mod compensator;
mod config;

// === Observability ===
mod observer;
mod stats;

// === Test Support ===
/// Recording sender and tracing setup for tests
#[cfg(any(test, feature = "test-harness"))]
pub mod testing;

#[cfg(test)]
mod integration_tests;

// === Re-exports ===

// Types
pub use context::{TransactionContext, TxPropagation};
pub use events::{CompensationMethod, EventType, Payload, TxEvent};
pub use idempotency::CompensationKey;
pub use ids::{IdentityGenerator, SequentialGenerator, TxId, UuidGenerator};

// State (typestate)
pub use state::{markers, Aborted, Active, Ended, SubTransaction};

// Errors
pub use errors::{CodecError, CompensationError, ConfigError, ContextError, SendError};

// Wire
pub use codec::{WireFormat, WireRecord};
pub use sender::{EncodingSender, EventChannel, FrameSink, MessageSender};

// Compensation
pub use catalog::{compensation_action, payload_as, CompensationAction, CompensationCatalog};
pub use dispatcher::{CompensationDispatcher, CompensationOutcome, MessageHandler};
pub use registry::{CompensationRegistry, RegisteredCompensation, Take};

// Storage
pub use journal::{
    compensation_plan, replay_compensations, CompensationTrigger, InMemoryJournal, JournalEntry,
    JournalError, JournalSender, TxJournal,
};

// Runtime
pub use compensator::{Compensator, CompensatorBuilder};
pub use config::{CompensationMode, CompensatorConfig};

// Observability
pub use observer::{NoOpObserver, TracingObserver, TxObserver};
pub use stats::{CompensatorStats, CompensatorStatsSnapshot};
