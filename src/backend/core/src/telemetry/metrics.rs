//! Prometheus metrics for cache lookups, upstream calls and pipeline runs.
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`init_metrics`] installs the Prometheus recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use crate::error::UpstreamCall;

pub const CACHE_LOOKUPS: &str = "gatekeeper_cache_lookups_total";
pub const CACHE_WRITES: &str = "gatekeeper_cache_writes_total";
pub const UPSTREAM_CALLS: &str = "gatekeeper_upstream_calls_total";
pub const UPSTREAM_CALL_DURATION: &str = "gatekeeper_upstream_call_duration_seconds";
pub const PIPELINE_RUNS: &str = "gatekeeper_pipeline_runs_total";
pub const ERRORS: &str = "gatekeeper_errors_total";

const UPSTREAM_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Handle onto the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandle").finish_non_exhaustive()
    }
}

impl MetricsHandle {
    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the Prometheus recorder and describe the gatekeeper metrics.
///
/// # Errors
///
/// Fails when a global recorder is already installed.
pub fn init_metrics() -> anyhow::Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(UPSTREAM_CALL_DURATION.to_string()), UPSTREAM_BUCKETS)?
        .install_recorder()?;

    register_metric_descriptions();
    tracing::info!("Metrics initialized");

    Ok(MetricsHandle { handle })
}

fn register_metric_descriptions() {
    describe_counter!(CACHE_LOOKUPS, "Identity/profile cache lookups by result");
    describe_counter!(CACHE_WRITES, "Cache fills by result");
    describe_counter!(UPSTREAM_CALLS, "Calls to the identity service and event store");
    describe_histogram!(UPSTREAM_CALL_DURATION, "Upstream call duration in seconds");
    describe_counter!(PIPELINE_RUNS, "Auth pipeline runs by outcome");
    describe_counter!(ERRORS, "Errors raised, by code");
}

/// Record a cache lookup. `result` is `hit`, `miss` or `expired`.
pub fn record_cache_lookup(namespace: &'static str, result: &'static str) {
    counter!(CACHE_LOOKUPS, "namespace" => namespace, "result" => result).increment(1);
}

pub fn record_cache_write(namespace: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!(CACHE_WRITES, "namespace" => namespace, "result" => result).increment(1);
}

/// Record one upstream call with its outcome and latency.
pub fn record_upstream_call(call: UpstreamCall, outcome: &'static str, elapsed: Duration) {
    counter!(UPSTREAM_CALLS, "call" => call.as_str(), "outcome" => outcome).increment(1);
    histogram!(UPSTREAM_CALL_DURATION, "call" => call.as_str()).record(elapsed.as_secs_f64());
}

pub fn record_pipeline_run(outcome: &'static str) {
    counter!(PIPELINE_RUNS, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_lookup("identity", "hit");
        record_cache_write("identity", false);
        record_upstream_call(UpstreamCall::GetUserByToken, "ok", Duration::from_millis(3));
        record_pipeline_run("ok");
    }

    #[test]
    fn test_metric_names_are_namespaced() {
        for name in [CACHE_LOOKUPS, CACHE_WRITES, UPSTREAM_CALLS, UPSTREAM_CALL_DURATION, PIPELINE_RUNS, ERRORS] {
            assert!(name.starts_with("gatekeeper_"));
        }
    }
}
