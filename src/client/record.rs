//! Per-worker latency accounting.
//!
//! A `LatencyRecorder` is owned by exactly one worker and mutated as the
//! worker makes progress. `finish` consumes it and produces the immutable
//! `ResultRecord` that gets emitted.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Summary of one client worker's run. Field order is the output order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub client_full_id: String,
    pub server_ip: String,
    pub server_port: u16,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub connection_success: bool,
    pub total_latency_ms: f64,
    pub errors: Vec<String>,
    pub average_latency_ms: f64,
}

/// Mutable accumulator behind a `ResultRecord`.
#[derive(Debug)]
pub struct LatencyRecorder {
    record: ResultRecord,
}

impl LatencyRecorder {
    pub fn new(
        client_full_id: impl Into<String>,
        server_ip: impl Into<String>,
        server_port: u16,
    ) -> Self {
        Self {
            record: ResultRecord {
                client_full_id: client_full_id.into(),
                server_ip: server_ip.into(),
                server_port,
                messages_sent: 0,
                messages_received: 0,
                connection_success: false,
                total_latency_ms: 0.0,
                errors: Vec::new(),
                average_latency_ms: 0.0,
            },
        }
    }

    pub fn mark_connected(&mut self) {
        self.record.connection_success = true;
    }

    /// A full payload was handed to the transport.
    pub fn record_sent(&mut self) {
        self.record.messages_sent += 1;
    }

    /// A complete echo arrived `elapsed` after its payload was sent.
    pub fn record_round_trip(&mut self, elapsed: Duration) {
        debug_assert!(self.record.messages_received < self.record.messages_sent);
        self.record.messages_received += 1;
        self.record.total_latency_ms += elapsed.as_secs_f64() * 1000.0;
    }

    pub fn record_error(&mut self, error: impl Display) {
        self.record.errors.push(error.to_string());
    }

    /// Compute the average and hand out the final record.
    pub fn finish(mut self) -> ResultRecord {
        let record = &mut self.record;
        if record.messages_received > 0 {
            record.average_latency_ms = record.total_latency_ms / record.messages_received as f64;
        }
        self.record
    }
}
