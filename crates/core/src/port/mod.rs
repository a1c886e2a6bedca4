//! Port traits and record types for the engine's external collaborators.
//!
//! Each store module pairs a record type with the trait its backends
//! implement. Selection queries take an explicit `now` so tests control time;
//! all mutations are idempotent at the storage layer (re-marking a settled
//! record is accepted, marking an unknown id is a no-op).

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod inbox;
pub mod outbox;
pub mod saga;
pub mod scheduled;
