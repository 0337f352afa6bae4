//! Metrics collection for Troupe
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Recording functions are always callable. With the `otel` feature they feed
//! OpenTelemetry instruments (exported via Prometheus); without it they are
//! no-ops.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

// Cached instruments (created once, reused for all recordings)
#[cfg(feature = "otel")]
static ACTORS_CREATED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("troupe")
        .u64_counter(METRIC_NAME_ACTORS_CREATED_TOTAL)
        .with_description("Total number of actors created")
        .init()
});

#[cfg(feature = "otel")]
static ACTORS_STOPPED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("troupe")
        .u64_counter(METRIC_NAME_ACTORS_STOPPED_TOTAL)
        .with_description("Total number of actors stopped")
        .init()
});

#[cfg(feature = "otel")]
static MESSAGES_DISPATCHED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("troupe")
        .u64_counter(METRIC_NAME_MESSAGES_DISPATCHED_TOTAL)
        .with_description("Total number of messages handed to a behavior")
        .init()
});

#[cfg(feature = "otel")]
static MESSAGE_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("troupe")
        .f64_histogram(METRIC_NAME_MESSAGE_DURATION_SECONDS)
        .with_description("Message processing duration in seconds")
        .init()
});

#[cfg(feature = "otel")]
static MESSAGES_BOUNCED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("troupe")
        .u64_counter(METRIC_NAME_MESSAGES_BOUNCED_TOTAL)
        .with_description("Total number of messages bounced")
        .init()
});

#[cfg(feature = "otel")]
static SUPERVISION_DECISIONS_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("troupe")
        .u64_counter(METRIC_NAME_SUPERVISION_DECISIONS_TOTAL)
        .with_description("Total number of supervision directives applied")
        .init()
});

/// Record actor creation
#[cfg(feature = "otel")]
pub fn record_actor_created() {
    ACTORS_CREATED_COUNTER.add(1, &[]);
}

/// Record actor stop
#[cfg(feature = "otel")]
pub fn record_actor_stopped() {
    ACTORS_STOPPED_COUNTER.add(1, &[]);
}

/// Record one message dispatch
///
/// # Arguments
/// * `status` - "success", "failure", or "interrupted"
/// * `duration_seconds` - Time spent inside the behavior
#[cfg(feature = "otel")]
pub fn record_message_dispatched(status: &str, duration_seconds: f64) {
    MESSAGES_DISPATCHED_COUNTER.add(1, &[KeyValue::new("status", status.to_string())]);
    MESSAGE_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("status", status.to_string())],
    );
}

/// Record a bounced message
///
/// # Arguments
/// * `reason` - "quota_exceeded", "dismissed", or "thread_aborted"
#[cfg(feature = "otel")]
pub fn record_message_bounced(reason: &str) {
    MESSAGES_BOUNCED_COUNTER.add(1, &[KeyValue::new("reason", reason.to_string())]);
}

/// Record a supervision directive applied by a suspended actor
#[cfg(feature = "otel")]
pub fn record_supervision_decision(directive: &str) {
    SUPERVISION_DECISIONS_COUNTER.add(1, &[KeyValue::new("directive", directive.to_string())]);
}

// No-op implementations when otel feature is disabled
#[cfg(not(feature = "otel"))]
pub fn record_actor_created() {}

#[cfg(not(feature = "otel"))]
pub fn record_actor_stopped() {}

#[cfg(not(feature = "otel"))]
pub fn record_message_dispatched(_status: &str, _duration_seconds: f64) {}

#[cfg(not(feature = "otel"))]
pub fn record_message_bounced(_reason: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_supervision_decision(_directive: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_functions_dont_panic() {
        record_actor_created();
        record_actor_stopped();
        record_message_dispatched("success", 0.001);
        record_message_bounced("quota_exceeded");
        record_supervision_decision("resume");
    }
}
