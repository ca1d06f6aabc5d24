//! Structured logging with JSON/pretty/compact formats.
//!
//! Tokens never reach the log output. Call sites log a [`token_fingerprint`]
//! instead, and free-form text coming back from upstream services is passed
//! through [`redact_tokens`] before it is attached to an error or an event.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Number of hex characters kept from the token digest.
const FINGERPRINT_LEN: usize = 12;

const REDACTED: &str = "[REDACTED]";

static REDACTOR: OnceLock<TokenRedactor> = OnceLock::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production/structured logging
    #[default]
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Hex SHA-256 of a token. Used where tokens would otherwise be stored.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Short, stable, non-reversible identifier for a token, safe to log.
pub fn token_fingerprint(token: &str) -> String {
    let mut encoded = token_digest(token);
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Strips token-looking values out of free-form text.
#[derive(Debug, Clone)]
pub struct TokenRedactor {
    patterns: Vec<regex::Regex>,
}

impl TokenRedactor {
    /// Build a redactor that masks values following the given header name
    /// as well as `token=` pairs and bearer/JWT-shaped strings.
    pub fn new(token_header: &str) -> Self {
        let header = regex::escape(token_header);
        let sources = [
            format!(r"(?i)({header}\s*[:=]\s*)[^\s,;&]+"),
            r"(?i)(\btoken\s*[:=]\s*)[^\s,;&]+".to_string(),
            r"(?i)(\bbearer\s+)[A-Za-z0-9._~+/=-]+".to_string(),
            r"()eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+".to_string(),
        ];

        let patterns = sources
            .iter()
            .filter_map(|source| regex::Regex::new(source).ok())
            .collect();

        Self { patterns }
    }

    pub fn redact(&self, value: &str) -> String {
        let mut result = value.to_string();
        for pattern in &self.patterns {
            result = pattern
                .replace_all(&result, format!("${{1}}{REDACTED}").as_str())
                .into_owned();
        }
        result
    }

    /// Get the global redactor instance.
    pub fn global() -> &'static TokenRedactor {
        REDACTOR.get_or_init(|| TokenRedactor::new("X-Auth-Token"))
    }
}

/// Redact with the global redactor.
pub fn redact_tokens(value: &str) -> String {
    TokenRedactor::global().redact(value)
}

/// Initialize the logging subsystem.
///
/// `token_header` seeds the global redactor so that upstream error text
/// echoing the header is masked.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global
/// subscriber is already installed.
pub fn init_logging(level: &str, format: LogFormat, token_header: &str) -> anyhow::Result<()> {
    let _ = REDACTOR.set(TokenRedactor::new(token_header));

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer().compact().with_target(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::info!(format = ?format, level = %level, "Logging initialized");
    Ok(())
}
