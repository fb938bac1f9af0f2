//! Prometheus metrics exported by the engine.
//!
//! Every name carries the `rt_` prefix. Label sets stay small: `actor_type`
//! is one of server, channel or user, `reason` comes from
//! `DeliveryError::label`, and `message_type` from the actor message enums.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global recorder. The returned handle renders `/metrics`.
///
/// # Errors
///
/// Fails when a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Actor message handling: in-process, expected well under 10ms
        .set_buckets_for_metric(
            Matcher::Prefix("rt_message".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of live actors of one kind.
///
/// Metric: `rt_actors_active`
/// Labels: `actor_type`
pub fn set_actors_active(actor_type: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rt_actors_active", "actor_type" => actor_type.to_string()).set(count as f64);
}

/// Set the number of live WebSocket sessions.
///
/// Metric: `rt_sessions_active`
/// Labels: none
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rt_sessions_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rt_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rt_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Record actor message handling latency.
///
/// Metric: `rt_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message_latency(message_type: &str, duration: Duration) {
    histogram!("rt_message_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}

/// An actor task panicked.
///
/// Metric: `rt_actor_panics_total`
/// Labels: `actor_type`
///
/// Non-zero means a bug.
pub fn record_actor_panic(actor_type: &str) {
    counter!("rt_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// An outbound frame was dropped because the session queue was full.
///
/// Metric: `rt_messages_dropped_total`
/// Labels: `actor_type`
pub fn record_message_dropped(actor_type: &str) {
    counter!("rt_messages_dropped_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Record a failed delivery.
///
/// Metric: `rt_delivery_failures_total`
/// Labels: `reason` (`not_found`, `stale`, `message_type`, `closed`)
///
/// Expected during churn: a session disconnecting while a broadcast is in
/// flight shows up here as `not_found`.
pub fn record_delivery_failure(reason: &str) {
    counter!("rt_delivery_failures_total", "reason" => reason.to_string()).increment(1);
}

/// Record a connection closed for missing heartbeats.
///
/// Metric: `rt_heartbeat_timeouts_total`
pub fn record_heartbeat_timeout() {
    counter!("rt_heartbeat_timeouts_total").increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    fn counter_value(snapshot: &[(String, DebugValue)], name: &str) -> Option<u64> {
        snapshot.iter().find_map(|(key, value)| match value {
            DebugValue::Counter(v) if key == name => Some(*v),
            _ => None,
        })
    }

    fn capture(f: impl FnOnce()) -> Vec<(String, DebugValue)> {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| (key.key().name().to_string(), value))
            .collect()
    }

    #[test]
    fn test_counters_are_recorded() {
        let snapshot = capture(|| {
            record_actor_panic("channel");
            record_message_dropped("user");
            record_message_dropped("user");
            record_delivery_failure("stale");
            record_heartbeat_timeout();
        });

        assert_eq!(counter_value(&snapshot, "rt_actor_panics_total"), Some(1));
        assert_eq!(counter_value(&snapshot, "rt_messages_dropped_total"), Some(2));
        assert_eq!(counter_value(&snapshot, "rt_delivery_failures_total"), Some(1));
        assert_eq!(counter_value(&snapshot, "rt_heartbeat_timeouts_total"), Some(1));
    }

    #[test]
    fn test_gauges_and_histograms_are_recorded() {
        let snapshot = capture(|| {
            set_actors_active("server", 3);
            set_sessions_active(7);
            set_actor_mailbox_depth("channel", 12);
            record_message_latency("connect", Duration::from_millis(2));
        });

        let gauge = |name: &str| {
            snapshot.iter().find_map(|(key, value)| match value {
                DebugValue::Gauge(v) if key == name => Some(v.0),
                _ => None,
            })
        };
        assert_eq!(gauge("rt_actors_active"), Some(3.0));
        assert_eq!(gauge("rt_sessions_active"), Some(7.0));
        assert_eq!(gauge("rt_actor_mailbox_depth"), Some(12.0));
        assert!(snapshot.iter().any(|(key, value)| {
            key == "rt_message_latency_seconds" && matches!(value, DebugValue::Histogram(v) if v.len() == 1)
        }));
    }
}
