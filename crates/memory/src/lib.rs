//! # duroq-memory
//!
//! In-memory implementations of the duroq store ports, plus a manually
//! advanced clock. Suitable for tests and for single-process deployments
//! that do not need durability; the reference backend for the store
//! contracts.

pub mod clock;
pub mod inbox;
pub mod outbox;
pub mod saga;
pub mod scheduled;

pub use clock::ManualClock;
pub use inbox::InMemoryInboxStore;
pub use outbox::InMemoryOutboxStore;
pub use saga::InMemorySagaStore;
pub use scheduled::InMemoryScheduledStore;
