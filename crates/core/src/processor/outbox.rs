//! Outbox processor.
//!
//! Drains pending outbox records through the request dispatcher on a fixed
//! interval. Failed attempts are retried with exponential backoff until the
//! retry budget is exhausted, at which point the record is dead-lettered:
//! it stays queryable for operator inspection but the pending filter excludes
//! it from further processing.

use crate::codec::PayloadRegistry;
use crate::config::EngineConfig;
use crate::port::clock::Clock;
use crate::port::dispatcher::RequestDispatcher;
use crate::port::error::StoreError;
use crate::port::outbox::{OutboxRecord, OutboxStore};
use crate::processor::ProcessReport;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Periodic loop draining pending outbox records.
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    dispatcher: Arc<dyn RequestDispatcher>,
    registry: Arc<PayloadRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    policy: RetryPolicy,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        dispatcher: Arc<dyn RequestDispatcher>,
        registry: Arc<PayloadRegistry>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let policy = config.retry_policy();
        Self {
            store,
            dispatcher,
            registry,
            clock,
            config,
            policy,
        }
    }

    /// Run the processing loop until cancelled.
    ///
    /// Returns immediately when processing is disabled by configuration.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enable_processor {
            info!("outbox processor disabled by configuration");
            return;
        }

        info!(
            interval_ms = self.config.processing_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox processor started"
        );

        let mut interval = tokio::time::interval(self.config.processing_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("outbox processor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    match self.process_batch(&cancel).await {
                        Ok(report) if !report.is_empty() => {
                            debug!(
                                processed = report.processed,
                                succeeded = report.succeeded,
                                failed = report.failed,
                                "outbox batch processed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("outbox batch fetch failed: {e}"),
                    }
                }
            }
        }
    }

    /// Process one batch of pending records.
    ///
    /// Every record is attempted independently; dispatch and codec failures
    /// are converted to failed-attempt outcomes and never escape the loop.
    pub async fn process_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ProcessReport, StoreError> {
        let now = self.clock.now();
        let records = self
            .store
            .fetch_pending(now, self.config.max_retries, self.config.batch_size)
            .await?;

        let mut report = ProcessReport::default();
        for record in records {
            // Already-settled work is persisted before exit; the rest stays
            // pending for the next iteration.
            if cancel.is_cancelled() {
                break;
            }
            report.processed += 1;

            match self.dispatch_record(&record, cancel).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_succeeded(record.id, self.clock.now()).await {
                        error!(id = %record.id, "failed to mark outbox record succeeded: {e}");
                    }
                    report.succeeded += 1;
                }
                Err(reason) => {
                    self.record_failure(&record, &reason).await;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn dispatch_record(
        &self,
        record: &OutboxRecord,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        let payload = self
            .registry
            .decode(&record.payload_type, &record.payload)
            .map_err(|e| e.to_string())?;

        self.dispatcher
            .dispatch(payload, cancel)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn record_failure(&self, record: &OutboxRecord, reason: &str) {
        let attempt = record.retry_count + 1;
        let next_retry_at = self.policy.schedule_for(self.clock.now(), attempt);
        if next_retry_at.is_none() {
            warn!(id = %record.id, attempt, "outbox record dead-lettered: {reason}");
        } else {
            debug!(id = %record.id, attempt, "outbox dispatch failed, will retry: {reason}");
        }

        if let Err(e) = self.store.mark_failed(record.id, reason, next_retry_at).await {
            error!(id = %record.id, "failed to mark outbox record failed: {e}");
        }
    }
}
