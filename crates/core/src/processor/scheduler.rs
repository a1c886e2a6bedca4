//! Scheduler processor.
//!
//! Drains due scheduled commands on a fixed interval. One-shot records
//! settle on success; recurring records are rescheduled to the next cron
//! occurrence strictly after the execution time. Failures share the outbox
//! retry arithmetic, and a dead-lettered recurring record stops firing until
//! manually rescheduled.

use crate::codec::PayloadRegistry;
use crate::config::EngineConfig;
use crate::port::clock::Clock;
use crate::port::dispatcher::RequestDispatcher;
use crate::port::error::StoreError;
use crate::port::scheduled::{ScheduledRecord, ScheduledStore};
use crate::processor::ProcessReport;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Periodic loop dispatching due scheduled commands.
pub struct SchedulerProcessor {
    store: Arc<dyn ScheduledStore>,
    dispatcher: Arc<dyn RequestDispatcher>,
    registry: Arc<PayloadRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    policy: RetryPolicy,
}

impl SchedulerProcessor {
    pub fn new(
        store: Arc<dyn ScheduledStore>,
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
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.enable_processor {
            info!("scheduler processor disabled by configuration");
            return;
        }

        info!(
            interval_ms = self.config.processing_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "scheduler processor started"
        );

        let mut interval = tokio::time::interval(self.config.processing_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler processor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    match self.process_batch(&cancel).await {
                        Ok(report) if !report.is_empty() => {
                            debug!(
                                processed = report.processed,
                                succeeded = report.succeeded,
                                failed = report.failed,
                                "scheduler batch processed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("scheduler batch fetch failed: {e}"),
                    }
                }
            }
        }
    }

    /// Process one batch of due records.
    pub async fn process_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ProcessReport, StoreError> {
        let now = self.clock.now();
        let records = self
            .store
            .fetch_due(now, self.config.max_retries, self.config.batch_size)
            .await?;

        let mut report = ProcessReport::default();
        for record in records {
            if cancel.is_cancelled() {
                break;
            }
            report.processed += 1;

            match self.execute_record(&record, cancel).await {
                Ok(()) => report.succeeded += 1,
                Err(reason) => {
                    self.record_failure(&record, &reason).await;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Dispatch one record and persist its outcome. Any error string returned
    /// here is a failed attempt subject to the retry budget.
    async fn execute_record(
        &self,
        record: &ScheduledRecord,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        let payload = self
            .registry
            .decode(&record.request_type, &record.payload)
            .map_err(|e| e.to_string())?;

        self.dispatcher
            .dispatch(payload, cancel)
            .await
            .map_err(|e| e.to_string())?;

        let executed_at = self.clock.now();
        if record.is_recurring {
            let next_at = next_occurrence(record, executed_at)?;
            if let Err(e) = self.store.reschedule(record.id, next_at, executed_at).await {
                error!(id = %record.id, "failed to reschedule recurring record: {e}");
            } else {
                debug!(id = %record.id, next_at = %next_at, "recurring record rescheduled");
            }
        } else if let Err(e) = self.store.mark_succeeded(record.id, executed_at).await {
            error!(id = %record.id, "failed to mark scheduled record succeeded: {e}");
        }

        Ok(())
    }

    async fn record_failure(&self, record: &ScheduledRecord, reason: &str) {
        let attempt = record.retry_count + 1;
        let next_retry_at = self.policy.schedule_for(self.clock.now(), attempt);
        if next_retry_at.is_none() {
            warn!(id = %record.id, attempt, "scheduled record dead-lettered: {reason}");
        } else {
            debug!(id = %record.id, attempt, "scheduled dispatch failed, will retry: {reason}");
        }

        if let Err(e) = self.store.mark_failed(record.id, reason, next_retry_at).await {
            error!(id = %record.id, "failed to mark scheduled record failed: {e}");
        }
    }
}

/// Next cron occurrence strictly after `after`.
fn next_occurrence(record: &ScheduledRecord, after: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let expression = record
        .cron_expression
        .as_deref()
        .ok_or_else(|| "recurring record has no cron expression".to_string())?;
    let schedule = Schedule::from_str(expression)
        .map_err(|e| format!("invalid cron expression '{expression}': {e}"))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| format!("cron expression '{expression}' has no upcoming occurrence"))
}
