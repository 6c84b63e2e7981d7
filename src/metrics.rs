// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Bus messages received per topic
//! - Operations applied to local replicas
//! - Announcements published
//! - Store transaction latency and failures
//! - Reload round trips and barrier outcomes
//! - Replication-path errors
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replica_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! Recording is a no-op until the host process installs a `metrics` recorder.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a message delivered by the bus for a topic.
pub fn record_message_received(topic: &str, op: &str) {
    counter!("replica_messages_received_total", "topic" => topic.to_string(), "op" => op.to_string()).increment(1);
}

/// Record an operation applied to a replica's state.
pub fn record_operation_applied(topic: &str, kind: &str, op: &str) {
    counter!(
        "replica_operations_applied_total",
        "topic" => topic.to_string(),
        "kind" => kind.to_string(),
        "op" => op.to_string()
    )
    .increment(1);
}

/// Record an announcement published as part of a store transaction.
pub fn record_publish(topic: &str, op: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replica_publishes_total",
        "topic" => topic.to_string(),
        "op" => op.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a store transaction (MULTI/EXEC batch).
pub fn record_store_exec(commands: usize, duration: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("replica_store_transactions_total", "status" => status).increment(1);
    histogram!("replica_store_transaction_commands").record(commands as f64);
    histogram!("replica_store_transaction_duration_seconds").record(duration.as_secs_f64());
}

/// Record a completed full reload (read + apply).
pub fn record_reload(topic: &str, duration: Duration) {
    counter!("replica_reloads_total", "topic" => topic.to_string()).increment(1);
    histogram!("replica_reload_duration_seconds", "topic" => topic.to_string())
        .record(duration.as_secs_f64());
}

/// Record how an initialize barrier ended ("resolved", "failed", "timeout").
pub fn record_barrier_outcome(topic: &str, outcome: &str) {
    counter!(
        "replica_reload_barriers_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an error surfaced through the replication path.
pub fn record_replication_error(topic: &str, error_type: &str) {
    counter!(
        "replica_replication_errors_total",
        "topic" => topic.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Gauge for the number of listeners registered on a replica.
pub fn set_listener_count(topic: &str, count: usize) {
    gauge!("replica_listeners", "topic" => topic.to_string()).set(count as f64);
}

/// Record an attempt to open a long-lived handle ("producer" or "consumer").
pub fn record_connection(direction: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replica_connections_total",
        "direction" => direction.to_string(),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these are no-ops; the tests make sure
    // every label combination is accepted by the macros.

    #[test]
    fn test_record_message_received() {
        record_message_received("flags", "set");
        record_message_received("flags", "unknown");
    }

    #[test]
    fn test_record_operation_applied() {
        record_operation_applied("flags", "value", "load");
        record_operation_applied("users", "hash", "delete");
    }

    #[test]
    fn test_record_publish() {
        record_publish("flags", "set", true);
        record_publish("flags", "clear", false);
    }

    #[test]
    fn test_record_store_exec() {
        record_store_exec(3, Duration::from_millis(2), true);
        record_store_exec(0, Duration::ZERO, false);
    }

    #[test]
    fn test_record_reload_and_barrier() {
        record_reload("flags", Duration::from_millis(5));
        record_barrier_outcome("flags", "resolved");
        record_barrier_outcome("flags", "timeout");
    }

    #[test]
    fn test_record_errors_and_gauges() {
        record_replication_error("flags", "decode");
        set_listener_count("flags", 0);
        set_listener_count("flags", 3);
        record_connection("producer", true);
        record_connection("consumer", false);
    }
}
