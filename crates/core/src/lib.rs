//! # duroq-core
//!
//! Reliable-messaging engine: durable Outbox, Inbox, Saga and Scheduled
//! message handling on top of a pluggable store.
//!
//! The engine is built from small, independently testable pieces:
//!
//! - [`port`]: record types and the store/dispatcher/clock traits that
//!   concrete backends implement.
//! - [`retry`]: pure exponential-backoff and dead-letter arithmetic shared
//!   by the processors.
//! - [`codec`]: the typed payload registry that resolves persisted type
//!   names to decode functions.
//! - [`processor`]: the Outbox and Scheduler background loops.
//! - [`inbox`]: the synchronous de-duplication guard for inbound requests.
//! - [`saga`]: the saga lifecycle coordinator and stuck-saga scan.
//!
//! # Delivery semantics
//!
//! Delivery is at-least-once: multiple processor instances may drain the same
//! store concurrently and no claim/lease is taken on a fetched batch. All
//! dispatch targets must be idempotent; the [`inbox::InboxGuard`] converts
//! at-least-once delivery into effectively-once processing where required.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = PayloadRegistry::new();
//! registry.register::<OrderPlaced>("OrderPlaced");
//!
//! let processor = OutboxProcessor::new(store, dispatcher, Arc::new(registry), clock, config);
//! tokio::spawn(async move { processor.run(shutdown).await });
//! ```

pub mod codec;
pub mod config;
pub mod inbox;
pub mod port;
pub mod processor;
pub mod retry;
pub mod saga;

pub use codec::{CodecError, Payload, PayloadRegistry};
pub use config::EngineConfig;
pub use inbox::{InboxConfig, InboxError, InboxGuard};
pub use port::clock::{Clock, SystemClock};
pub use port::dispatcher::{DispatchFailure, RequestDispatcher};
pub use port::error::StoreError;
pub use port::inbox::{InboxRecord, InboxStore};
pub use port::outbox::{OutboxRecord, OutboxStore};
pub use port::saga::{SagaRecord, SagaStatus, SagaStore};
pub use port::scheduled::{CronParseError, ScheduledRecord, ScheduledStore};
pub use processor::outbox::OutboxProcessor;
pub use processor::scheduler::SchedulerProcessor;
pub use processor::ProcessReport;
pub use retry::RetryPolicy;
pub use saga::{SagaCoordinator, SagaError};
