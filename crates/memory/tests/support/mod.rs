#![allow(dead_code)]

use async_trait::async_trait;
use duroq_core::codec::{Payload, PayloadRegistry};
use duroq_core::port::dispatcher::{DispatchFailure, RequestDispatcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipOrder {
    pub order_id: String,
}

impl ShipOrder {
    pub fn bytes(order_id: &str) -> Vec<u8> {
        serde_json::to_vec(&ShipOrder {
            order_id: order_id.to_string(),
        })
        .unwrap()
    }
}

/// Registry with the test payload type pre-registered.
pub fn registry() -> Arc<PayloadRegistry> {
    let mut registry = PayloadRegistry::new();
    registry.register::<ShipOrder>("ShipOrder");
    Arc::new(registry)
}

/// Dispatcher that records every call and fails a configurable number of
/// initial attempts before succeeding.
pub struct RecordingDispatcher {
    calls: Mutex<Vec<String>>,
    failures_remaining: Mutex<u32>,
    response: Option<Vec<u8>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_remaining: Mutex::new(0),
            response: None,
        }
    }

    /// Fail the first `times` dispatches, then succeed.
    pub fn failing(times: u32) -> Self {
        Self {
            failures_remaining: Mutex::new(times),
            ..Self::new()
        }
    }

    /// Succeed with the given response bytes.
    pub fn with_response(response: Vec<u8>) -> Self {
        Self {
            response: Some(response),
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RequestDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        payload: Payload,
        _cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, DispatchFailure> {
        self.calls.lock().push(payload.type_name().to_string());

        let mut remaining = self.failures_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(DispatchFailure::failed("simulated failure"));
        }
        Ok(self.response.clone())
    }
}
