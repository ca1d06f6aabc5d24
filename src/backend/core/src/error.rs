//! Error handling for the gatekeeper pipeline.
//!
//! This module provides:
//! - A stable, machine-readable [`ErrorCode`] for every failure the pipeline can produce
//! - A classification of each code into expected outcomes, upstream failures and internal errors
//! - HTTP status code mapping and an axum response body
//! - Severity-aware logging with tracing and an error counter
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatekeeper_core::error::{GatekeeperError, Result, UpstreamCall};
//!
//! fn check(body: &serde_json::Value) -> Result<()> {
//!     if body.get("user").is_none() {
//!         return Err(GatekeeperError::malformed(UpstreamCall::GetUserByToken, "missing `user`"));
//!     }
//!     Ok(())
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication (1000-1099)
    NoToken,
    Unauthorized,

    // Upstream (2000-2099)
    Unreachable,
    Malformed,
    PersistenceError,

    // Event context (3000-3099)
    NotFound,

    // Cache (4000-4099)
    CacheWriteFailure,
    CacheReadFailure,

    // Configuration / internal (9000-9099)
    ConfigurationError,
    InternalError,
}

/// How a failure should be surfaced by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A user-facing outcome (missing token, access denied, unknown event).
    Expected,
    /// The identity service or event store is unhealthy or incompatible.
    UpstreamFailure,
    /// A bug or a misconfiguration of this service.
    Internal,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::NoToken => 1000,
            Self::Unauthorized => 1001,

            Self::Unreachable => 2000,
            Self::Malformed => 2001,
            Self::PersistenceError => 2002,

            Self::NotFound => 3000,

            Self::CacheWriteFailure => 4000,
            Self::CacheReadFailure => 4001,

            Self::ConfigurationError => 9000,
            Self::InternalError => 9001,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::NoToken | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unreachable
            | Self::Malformed
            | Self::PersistenceError
            | Self::CacheWriteFailure
            | Self::CacheReadFailure
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Classify the error for the caller.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NoToken | Self::Unauthorized | Self::NotFound => ErrorClass::Expected,
            Self::Unreachable | Self::Malformed | Self::PersistenceError => {
                ErrorClass::UpstreamFailure
            }
            Self::CacheWriteFailure
            | Self::CacheReadFailure
            | Self::ConfigurationError
            | Self::InternalError => ErrorClass::Internal,
        }
    }

    /// Severity used to pick the log level.
    pub const fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(self)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "authentication",
            2000..=2099 => "upstream",
            3000..=3099 => "event",
            4000..=4099 => "cache",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (no token, access denied, unknown event)
    Low,
    /// Recovered locally (cache read/write failures)
    Medium,
    /// Upstream unhealthy or incompatible
    High,
    /// Misconfiguration or a bug
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::NoToken | ErrorCode::Unauthorized | ErrorCode::NotFound => Self::Low,
            ErrorCode::CacheWriteFailure | ErrorCode::CacheReadFailure => Self::Medium,
            ErrorCode::Unreachable | ErrorCode::Malformed | ErrorCode::PersistenceError => {
                Self::High
            }
            ErrorCode::ConfigurationError | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Upstream Calls
// ═══════════════════════════════════════════════════════════════════════════════

/// The outbound call an upstream failure belongs to.
///
/// Logged instead of the raw payload so failures can be diagnosed without
/// leaking user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamCall {
    GetUserByToken,
    GetUserProfile,
    GetUser,
    EventStore,
    IdentityCache,
}

impl UpstreamCall {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetUserByToken => "get_user_by_token",
            Self::GetUserProfile => "get_user_profile",
            Self::GetUser => "get_user",
            Self::EventStore => "event_store",
            Self::IdentityCache => "identity_cache",
        }
    }
}

impl fmt::Display for UpstreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Upstream call that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamCall>,

    /// Related entity (e.g. the event reference that was not found)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upstream(mut self, call: UpstreamCall) -> Self {
        self.upstream = Some(call);
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.upstream.is_none() && self.entity_id.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type for every stage of the pipeline.
#[derive(Error, Debug)]
pub struct GatekeeperError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for GatekeeperError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl GatekeeperError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// The request carried no token.
    pub fn no_token() -> Self {
        Self::new(ErrorCode::NoToken, "No auth token provided")
    }

    /// The identity service explicitly denied the token.
    pub fn unauthorized(call: UpstreamCall) -> Self {
        Self::new(ErrorCode::Unauthorized, "Access denied")
            .with_details(ErrorDetails::new().with_upstream(call))
    }

    /// A transport failure talking to an upstream.
    pub fn unreachable(call: UpstreamCall, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::Unreachable,
            "Could not contact the identity service",
            reason,
        )
        .with_details(ErrorDetails::new().with_upstream(call))
    }

    /// An upstream answered with something that could not be understood.
    pub fn malformed(call: UpstreamCall, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::Malformed,
            "Unexpected response from the identity service",
            reason,
        )
        .with_details(ErrorDetails::new().with_upstream(call))
    }

    /// No event matches the given reference.
    pub fn event_not_found(event_ref: impl Into<String>) -> Self {
        let event_ref = event_ref.into();
        Self::new(
            ErrorCode::NotFound,
            format!("Event with id {} not found", event_ref),
        )
        .with_details(ErrorDetails::new().with_entity(event_ref))
    }

    /// A generic failure of the event store.
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PersistenceError,
            "Could not load the event",
            reason,
        )
        .with_details(ErrorDetails::new().with_upstream(UpstreamCall::EventStore))
    }

    /// The identity cache could not store an entry.
    pub fn cache_write(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::CacheWriteFailure,
            "Could not store user data in cache",
            reason,
        )
        .with_details(ErrorDetails::new().with_upstream(UpstreamCall::IdentityCache))
    }

    /// The identity cache could not be read. Callers treat this as a miss.
    pub fn cache_read(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::CacheReadFailure,
            "Could not read user data from cache",
            reason,
        )
        .with_details(ErrorDetails::new().with_upstream(UpstreamCall::IdentityCache))
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Service is misconfigured",
            message,
        )
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Replace the error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Tag the error with the upstream call it belongs to.
    pub fn for_call(mut self, call: UpstreamCall) -> Self {
        self.details.upstream = Some(call);
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn upstream(&self) -> Option<UpstreamCall> {
        self.details.upstream
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let upstream = self.details.upstream.map(|c| c.as_str());

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    upstream = ?upstream,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Request failed"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    upstream = ?upstream,
                    internal_message = ?self.internal_message,
                    "Recovered from error"
                );
            }
            ErrorSeverity::Low => {
                debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "gatekeeper_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&GatekeeperError> for ErrorResponse {
    fn from(error: &GatekeeperError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for GatekeeperError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<reqwest::Error> for GatekeeperError {
    fn from(error: reqwest::Error) -> Self {
        // Callers tag the upstream call with `for_call`.
        if error.is_decode() {
            Self::with_internal(
                ErrorCode::Malformed,
                "Unexpected response from the identity service",
                error.to_string(),
            )
            .with_source(error)
        } else {
            Self::with_internal(
                ErrorCode::Unreachable,
                "Could not contact the identity service",
                error.to_string(),
            )
            .with_source(error)
        }
    }
}

impl From<serde_json::Error> for GatekeeperError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::Malformed,
            "Unexpected response from the identity service",
            error.to_string(),
        )
        .with_source(error)
    }
}

/// PostgreSQL `invalid_text_representation`, raised when an identifier cannot be cast.
const PG_INVALID_TEXT_REPRESENTATION: &str = "22P02";

impl From<sqlx::Error> for GatekeeperError {
    fn from(error: sqlx::Error) -> Self {
        let not_found = match &error {
            sqlx::Error::RowNotFound => true,
            sqlx::Error::Database(db_err) => {
                db_err.code().as_deref() == Some(PG_INVALID_TEXT_REPRESENTATION)
            }
            _ => false,
        };

        if not_found {
            return Self::with_internal(
                ErrorCode::NotFound,
                "Event not found",
                error.to_string(),
            )
            .with_source(error);
        }

        Self::persistence(error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for GatekeeperError {
    fn from(error: redis::RedisError) -> Self {
        Self::cache_write(error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for GatekeeperError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::NoToken.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Unauthorized.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::Unreachable.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::Malformed.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(ErrorCode::NoToken.class(), ErrorClass::Expected);
        assert_eq!(ErrorCode::Unauthorized.class(), ErrorClass::Expected);
        assert_eq!(ErrorCode::NotFound.class(), ErrorClass::Expected);
        assert_eq!(ErrorCode::Unreachable.class(), ErrorClass::UpstreamFailure);
        assert_eq!(ErrorCode::Malformed.class(), ErrorClass::UpstreamFailure);
        assert_eq!(ErrorCode::CacheWriteFailure.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_upstream_call_is_recorded() {
        let error = GatekeeperError::malformed(UpstreamCall::GetUserProfile, "missing `roles`");
        assert_eq!(error.code(), ErrorCode::Malformed);
        assert_eq!(error.upstream(), Some(UpstreamCall::GetUserProfile));
        assert_eq!(error.internal_message(), Some("missing `roles`"));
    }

    #[test]
    fn test_error_response_hides_internal_message() {
        let error = GatekeeperError::unreachable(UpstreamCall::GetUserByToken, "connection refused");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("UNREACHABLE"));
        assert!(json.contains("get_user_by_token"));
        assert!(!json.contains("connection refused"));
        assert!(!response.success);
    }

    #[test]
    fn test_event_not_found_details() {
        let error = GatekeeperError::event_not_found("summer-university");
        assert_eq!(error.code(), ErrorCode::NotFound);
        assert_eq!(error.details().entity_id.as_deref(), Some("summer-university"));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::Unauthorized),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::CacheWriteFailure),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::Malformed),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ConfigurationError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_cache_failures_are_told_apart() {
        let read = GatekeeperError::cache_read("connection reset");
        let write = GatekeeperError::cache_write("connection reset");

        assert_eq!(read.code(), ErrorCode::CacheReadFailure);
        assert_eq!(write.code(), ErrorCode::CacheWriteFailure);
        assert_ne!(read.code().numeric_code(), write.code().numeric_code());
        assert_eq!(read.code().category(), "cache");
        assert_eq!(read.severity(), ErrorSeverity::Medium);
        assert_eq!(read.upstream(), Some(UpstreamCall::IdentityCache));
    }

    #[test]
    fn test_sqlx_row_not_found_is_not_found() {
        let error = GatekeeperError::from(sqlx::Error::RowNotFound);
        assert_eq!(error.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_error_display() {
        let error = GatekeeperError::with_internal(
            ErrorCode::PersistenceError,
            "Could not load the event",
            "pool timed out",
        );

        let display = format!("{}", error);
        assert!(display.contains("PersistenceError"));
        assert!(display.contains("Could not load the event"));
        assert!(display.contains("pool timed out"));
    }
}
