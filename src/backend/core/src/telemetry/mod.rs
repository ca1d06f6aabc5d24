//! Telemetry: structured logging, token redaction and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, redact_tokens, token_digest, token_fingerprint, LogFormat, TokenRedactor};
pub use metrics::{init_metrics, record_upstream_call, MetricsHandle};
