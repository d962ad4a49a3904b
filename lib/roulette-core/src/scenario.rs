//! Static catalog of simulated error scenarios.

use http::StatusCode;

use crate::{outcome::OutcomeClass, response::ErrorCode};

/// A canned error: the status to return and the payload fields to populate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorScenario {
    /// HTTP status code returned for this scenario.
    pub status_code: StatusCode,

    /// Machine-readable error code.
    pub error_code: ErrorCode,

    /// Short error message.
    pub message: &'static str,

    /// Human-readable reason, returned in the `code` field.
    pub reason: &'static str,
}

/// Number of scenarios available for each error class.
pub const SCENARIOS_PER_CLASS: usize = 3;

/// All error scenarios.
///
/// The first [`SCENARIOS_PER_CLASS`] entries are client errors and the rest are server errors.
pub static ERROR_SCENARIOS: [ErrorScenario; 2 * SCENARIOS_PER_CLASS] = [
    ErrorScenario {
        status_code: StatusCode::BAD_REQUEST,
        error_code: ErrorCode::InvalidRequest,
        message: "Invalid request format",
        reason: "Missing required parameter 'user_id'",
    },
    ErrorScenario {
        status_code: StatusCode::BAD_REQUEST,
        error_code: ErrorCode::ValidationError,
        message: "Request validation failed",
        reason: "Email format is invalid",
    },
    ErrorScenario {
        status_code: StatusCode::BAD_REQUEST,
        error_code: ErrorCode::MissingAuth,
        message: "Authentication required",
        reason: "Authorization header is missing or malformed",
    },
    ErrorScenario {
        status_code: StatusCode::INTERNAL_SERVER_ERROR,
        error_code: ErrorCode::DatabaseError,
        message: "Internal database error",
        reason: "Connection to user database failed",
    },
    ErrorScenario {
        status_code: StatusCode::INTERNAL_SERVER_ERROR,
        error_code: ErrorCode::ServiceUnavailable,
        message: "External service error",
        reason: "Payment service is temporarily unavailable",
    },
    ErrorScenario {
        status_code: StatusCode::INTERNAL_SERVER_ERROR,
        error_code: ErrorCode::TimeoutError,
        message: "Request timeout",
        reason: "Upstream service did not respond within 30 seconds",
    },
];

/// Returns the scenarios that belong to the given outcome class.
///
/// Successful outcomes have no scenarios, so an empty slice is returned for [`OutcomeClass::Success`].
pub fn scenarios_for(class: OutcomeClass) -> &'static [ErrorScenario] {
    match class {
        OutcomeClass::Success => &[],
        OutcomeClass::ClientError => &ERROR_SCENARIOS[..SCENARIOS_PER_CLASS],
        OutcomeClass::ServerError => &ERROR_SCENARIOS[SCENARIOS_PER_CLASS..],
    }
}

/// Picks a scenario for the given error class using a uniform draw in `[0, 1)`.
///
/// The draw is mapped to an index with `floor(draw * 3)`, clamped to the valid range. Returns `None` for
/// [`OutcomeClass::Success`].
pub fn pick_scenario(class: OutcomeClass, draw: f64) -> Option<&'static ErrorScenario> {
    let scenarios = scenarios_for(class);
    if scenarios.is_empty() {
        return None;
    }

    let scaled = (draw * scenarios.len() as f64).floor();
    let idx = if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as usize).min(scenarios.len() - 1)
    };

    scenarios.get(idx)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn catalog_is_split_by_class() {
        for scenario in scenarios_for(OutcomeClass::ClientError) {
            assert_eq!(scenario.status_code, StatusCode::BAD_REQUEST);
        }
        for scenario in scenarios_for(OutcomeClass::ServerError) {
            assert_eq!(scenario.status_code, StatusCode::INTERNAL_SERVER_ERROR);
        }

        assert!(scenarios_for(OutcomeClass::Success).is_empty());
        assert!(pick_scenario(OutcomeClass::Success, 0.3).is_none());
    }

    #[test]
    fn draw_to_index() {
        let pick = |class, draw| pick_scenario(class, draw).map(|s| s.error_code);

        assert_eq!(pick(OutcomeClass::ClientError, 0.0), Some(ErrorCode::InvalidRequest));
        assert_eq!(pick(OutcomeClass::ClientError, 0.34), Some(ErrorCode::ValidationError));
        assert_eq!(pick(OutcomeClass::ClientError, 0.99), Some(ErrorCode::MissingAuth));
        assert_eq!(pick(OutcomeClass::ServerError, 0.0), Some(ErrorCode::DatabaseError));
        assert_eq!(pick(OutcomeClass::ServerError, 0.5), Some(ErrorCode::ServiceUnavailable));
        assert_eq!(pick(OutcomeClass::ServerError, 0.999), Some(ErrorCode::TimeoutError));

        // Misbehaving sources still land on a valid scenario.
        assert_eq!(pick(OutcomeClass::ServerError, 1.0), Some(ErrorCode::TimeoutError));
        assert_eq!(pick(OutcomeClass::ClientError, -3.0), Some(ErrorCode::InvalidRequest));
        assert_eq!(pick(OutcomeClass::ClientError, f64::NAN), Some(ErrorCode::InvalidRequest));
    }

    proptest! {
        #[test]
        fn property_test_pick_stays_in_class(draw in 0.0f64..1.0, server in any::<bool>()) {
            let class = if server { OutcomeClass::ServerError } else { OutcomeClass::ClientError };
            let scenario = pick_scenario(class, draw).expect("error classes always have scenarios");

            prop_assert_eq!(scenario.status_code, class.status_code());
            prop_assert_eq!(scenario.error_code.outcome_class(), class);
        }
    }
}
