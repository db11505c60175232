//! Prometheus metrics collection for the hub.
//!
//! Exposed by the HTTP side-channel on `/metrics`.
//!
//! - `hub_connections`, `hub_online_users`, `hub_groups` - registry size
//! - `hub_envelopes_total{kind}` - envelopes accepted by the router
//! - `hub_envelopes_rejected_total{reason}` - envelopes dropped at validation
//! - `hub_fanout` - recipients per envelope
//! - `hub_delivery_failures_total{reason}` - recipients torn down during fan-out
//! - `hub_queue_saturated_total` - control loop submissions that hit the timeout
//! - `hub_frame_duration_seconds{frame}` - inbound frame handling latency

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Gauges
// ========================================================================

/// Registered connections, identified or not.
pub static CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();

/// Users with an active connection.
pub static ONLINE_USERS: OnceLock<IntGauge> = OnceLock::new();

/// Groups with at least one member.
pub static ACTIVE_GROUPS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Counters
// ========================================================================

pub static ENVELOPES: OnceLock<IntCounterVec> = OnceLock::new();

pub static ENVELOPES_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Frames queued on recipients' outbound queues.
pub static DELIVERIES: OnceLock<IntCounter> = OnceLock::new();

pub static DELIVERY_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();

pub static SESSIONS_SUPERSEDED: OnceLock<IntCounter> = OnceLock::new();

pub static QUEUE_SATURATED: OnceLock<IntCounter> = OnceLock::new();

/// Frames rejected by the per-connection flood limiter.
pub static RATE_LIMITED: OnceLock<IntCounter> = OnceLock::new();

pub static FRAME_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Recipients per routed envelope.
pub static FANOUT: OnceLock<Histogram> = OnceLock::new();

pub static FRAME_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup. Recording before `init` is a no-op.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::error!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(CONNECTIONS, IntGauge::new("hub_connections", "Registered connections"));
    register!(ONLINE_USERS, IntGauge::new("hub_online_users", "Users with an active connection"));
    register!(ACTIVE_GROUPS, IntGauge::new("hub_groups", "Groups with at least one member"));
    register!(ENVELOPES, IntCounterVec::new(Opts::new("hub_envelopes_total", "Envelopes routed by kind"), &["kind"]));
    register!(ENVELOPES_REJECTED, IntCounterVec::new(Opts::new("hub_envelopes_rejected_total", "Envelopes rejected at validation"), &["reason"]));
    register!(DELIVERIES, IntCounter::new("hub_deliveries_total", "Frames queued for recipients"));
    register!(DELIVERY_FAILURES, IntCounterVec::new(Opts::new("hub_delivery_failures_total", "Recipients dropped during fan-out"), &["reason"]));
    register!(SESSIONS_SUPERSEDED, IntCounter::new("hub_sessions_superseded_total", "Connections replaced by a newer login"));
    register!(QUEUE_SATURATED, IntCounter::new("hub_queue_saturated_total", "Control loop submissions that timed out"));
    register!(RATE_LIMITED, IntCounter::new("hub_rate_limited_total", "Inbound frames rejected by flood protection"));
    register!(FRAME_ERRORS, IntCounterVec::new(Opts::new("hub_frame_errors_total", "Inbound frame handling errors"), &["frame", "error"]));
    register!(FANOUT, Histogram::with_opts(
        HistogramOpts::new("hub_fanout", "Recipients per routed envelope")
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0])));
    register!(FRAME_LATENCY, HistogramVec::new(
        HistogramOpts::new("hub_frame_duration_seconds", "Inbound frame handling latency")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["frame"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

#[inline]
pub fn set_registry_gauges(connections: usize, users: usize, groups: usize) {
    if let Some(g) = CONNECTIONS.get() {
        g.set(connections as i64);
    }
    if let Some(g) = ONLINE_USERS.get() {
        g.set(users as i64);
    }
    if let Some(g) = ACTIVE_GROUPS.get() {
        g.set(groups as i64);
    }
}

#[inline]
pub fn record_envelope(kind: &str) {
    if let Some(c) = ENVELOPES.get() {
        c.with_label_values(&[kind]).inc();
    }
}

#[inline]
pub fn record_rejected(reason: &str) {
    if let Some(c) = ENVELOPES_REJECTED.get() {
        c.with_label_values(&[reason]).inc();
    }
}

#[inline]
pub fn record_fanout(recipients: usize) {
    if let Some(h) = FANOUT.get() {
        h.observe(recipients as f64);
    }
}

#[inline]
pub fn record_deliveries(count: usize) {
    if let Some(c) = DELIVERIES.get() {
        c.inc_by(count as u64);
    }
}

#[inline]
pub fn record_delivery_failure(reason: &str) {
    if let Some(c) = DELIVERY_FAILURES.get() {
        c.with_label_values(&[reason]).inc();
    }
}

#[inline]
pub fn record_superseded() {
    if let Some(c) = SESSIONS_SUPERSEDED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_queue_saturated() {
    if let Some(c) = QUEUE_SATURATED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_rate_limited() {
    if let Some(c) = RATE_LIMITED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_frame(frame: &str, duration_secs: f64) {
    if let Some(h) = FRAME_LATENCY.get() {
        h.with_label_values(&[frame]).observe(duration_secs);
    }
}

#[inline]
pub fn record_frame_error(frame: &str, error: &str) {
    if let Some(c) = FRAME_ERRORS.get() {
        c.with_label_values(&[frame, error]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();
        record_envelope("chat");
        record_fanout(3);
        record_frame("chat", 0.001);
        set_registry_gauges(2, 1, 0);

        let output = gather_metrics();
        assert!(output.contains("hub_envelopes_total"));
        assert!(output.contains("hub_fanout"));
        assert!(output.contains("hub_connections"));
    }
}
