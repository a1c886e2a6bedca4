//! Background processors.
//!
//! Each processor is an independently started periodic loop with an owned
//! lifecycle: fetch a bounded batch, process records sequentially, sleep
//! until the next tick. A single record's failure is logged and classified,
//! never allowed to abort the batch. Cancellation observed mid-batch leaves
//! the remaining records pending for the next iteration.

pub mod outbox;
pub mod scheduler;

/// Outcome of one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Records taken from the batch.
    pub processed: usize,
    /// Records dispatched and marked succeeded.
    pub succeeded: usize,
    /// Records that failed and were scheduled for retry or dead-lettered.
    pub failed: usize,
}

impl ProcessReport {
    /// Whether the batch had no work.
    pub fn is_empty(&self) -> bool {
        self.processed == 0
    }
}
