//! Outcome classes.

use std::fmt;

use http::StatusCode;

/// Upper bound (exclusive) of the draw range that selects [`OutcomeClass::Success`].
pub const SUCCESS_THRESHOLD: f64 = 0.5;

/// Upper bound (exclusive) of the draw range that selects [`OutcomeClass::ClientError`].
///
/// Draws in `[SUCCESS_THRESHOLD, CLIENT_ERROR_THRESHOLD)` are client errors, and everything at or above this value is a
/// server error.
pub const CLIENT_ERROR_THRESHOLD: f64 = 0.8;

/// The category of response selected for a single request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OutcomeClass {
    /// The request "succeeded" (200).
    Success,

    /// A simulated client error (400).
    ClientError,

    /// A simulated server error (500).
    ServerError,
}

impl OutcomeClass {
    /// Maps a uniform draw in `[0, 1)` to an outcome class.
    ///
    /// Every band is inclusive at the low end and exclusive at the high end: `[0, 0.5)` is a success, `[0.5, 0.8)` is a
    /// client error, and `[0.8, 1.0)` is a server error. Values outside of `[0, 1)` are clamped into the nearest band.
    pub fn from_draw(draw: f64) -> Self {
        if draw < SUCCESS_THRESHOLD {
            Self::Success
        } else if draw < CLIENT_ERROR_THRESHOLD {
            Self::ClientError
        } else {
            Self::ServerError
        }
    }

    /// Returns the HTTP status code associated with this outcome class.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Success => StatusCode::OK,
            Self::ClientError => StatusCode::BAD_REQUEST,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the name used for this outcome class in logs and span tags.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
        }
    }

    /// Returns `true` if this outcome is one of the simulated error classes.
    pub const fn is_error(&self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
