//! Response payloads.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{outcome::OutcomeClass, scenario::ErrorScenario};

/// Message returned with every successful root response.
pub const SUCCESS_MESSAGE: &str = "Request processed successfully";

/// Status returned by the health endpoint.
pub const HEALTHY_STATUS: &str = "healthy";

/// Message returned by the health endpoint.
pub const HEALTHY_MESSAGE: &str = "Service is healthy";

/// Machine-readable error codes carried in the `error` field of [`ErrorResponse`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request.
    InvalidRequest,

    /// Request failed validation.
    ValidationError,

    /// Missing or malformed credentials.
    MissingAuth,

    /// Database failure.
    DatabaseError,

    /// A downstream service is unavailable.
    ServiceUnavailable,

    /// A downstream service timed out.
    TimeoutError,
}

impl ErrorCode {
    /// Returns the wire representation of this error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::MissingAuth => "MISSING_AUTH",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::TimeoutError => "TIMEOUT_ERROR",
        }
    }

    /// Returns the outcome class this error code belongs to.
    pub const fn outcome_class(&self) -> OutcomeClass {
        match self {
            Self::InvalidRequest | Self::ValidationError | Self::MissingAuth => OutcomeClass::ClientError,
            Self::DatabaseError | Self::ServiceUnavailable | Self::TimeoutError => OutcomeClass::ServerError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a successful (or health) response.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SuccessResponse {
    /// `success` for root requests, `healthy` for health checks.
    pub status: String,

    /// Human-readable message.
    pub message: String,

    /// RFC3339 timestamp of when the response was generated.
    pub timestamp: String,

    /// Unique ID of the request. Absent from health responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl SuccessResponse {
    /// Creates the body for a successful root request.
    pub fn success(request_id: String, now: DateTime<Utc>) -> Self {
        Self {
            status: "success".to_string(),
            message: SUCCESS_MESSAGE.to_string(),
            timestamp: format_timestamp(now),
            request_id: Some(request_id),
        }
    }

    /// Creates the body for a health check.
    pub fn healthy(now: DateTime<Utc>) -> Self {
        Self {
            status: HEALTHY_STATUS.to_string(),
            message: HEALTHY_MESSAGE.to_string(),
            timestamp: format_timestamp(now),
            request_id: None,
        }
    }
}

/// Body of a simulated error response.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: ErrorCode,

    /// Short description of the error.
    pub message: String,

    /// Human-readable reason for the error.
    pub code: String,

    /// RFC3339 timestamp of when the response was generated.
    pub timestamp: String,

    /// Unique ID of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Creates the body for the given error scenario.
    pub fn from_scenario(scenario: &ErrorScenario, request_id: String, now: DateTime<Utc>) -> Self {
        Self {
            error: scenario.error_code,
            message: scenario.message.to_string(),
            code: scenario.reason.to_string(),
            timestamp: format_timestamp(now),
            request_id: Some(request_id),
        }
    }
}

/// Either of the two response shapes.
///
/// Mostly useful for parsing a body without knowing its status ahead of time.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// A success or health body.
    Success(SuccessResponse),

    /// A simulated error body.
    Error(ErrorResponse),
}

impl ResponseBody {
    /// Returns the timestamp carried by the body.
    pub fn timestamp(&self) -> &str {
        match self {
            Self::Success(body) => &body.timestamp,
            Self::Error(body) => &body.timestamp,
        }
    }

    /// Returns the request ID carried by the body, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Success(body) => body.request_id.as_deref(),
            Self::Error(body) => body.request_id.as_deref(),
        }
    }
}

/// Formats a timestamp as RFC3339 with second precision and a `Z` suffix, e.g. `2024-05-01T12:30:00Z`.
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}
