//! Behavioral checks shared by every service implementation.
//!
//! Each service crate implements [`ServiceUnderTest`] for its own HTTP stack and then runs the checks in this module
//! from its integration tests, so that all implementations are held to the same contract without being compared to
//! each other.

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode};

use crate::{
    generator::JSON_CONTENT_TYPE,
    random::{SeededRandom, SequenceRandom, SharedRandomSource},
    response::{ErrorCode, ResponseBody},
    trace::{
        propagation::{DATADOG_PARENT_ID_HEADER, DATADOG_TRACE_ID_HEADER, TRACEPARENT_HEADER},
        FinishedSpan,
    },
};

/// Maximum allowed skew between a response timestamp and the time it was observed.
const MAX_TIMESTAMP_SKEW_SECS: i64 = 5;

/// A response as observed by an in-process client.
#[derive(Clone, Debug)]
pub struct ObservedResponse {
    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Complete response body.
    pub body: Bytes,

    /// Span attached to the response as an extension, if the service recorded one.
    pub span: Option<FinishedSpan>,
}

impl ObservedResponse {
    /// Builds an `ObservedResponse` from the parts of an HTTP response.
    pub fn from_parts(parts: http::response::Parts, body: Bytes) -> Self {
        Self {
            status: parts.status,
            span: parts.extensions.get::<FinishedSpan>().cloned(),
            headers: parts.headers,
            body,
        }
    }

    /// Parses the body as one of the two response shapes, panicking if it is neither.
    pub fn parse_body(&self) -> ResponseBody {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "response body is not a valid payload ({}): {}",
                e,
                String::from_utf8_lossy(&self.body)
            )
        })
    }
}

/// A service implementation driven in-process by the conformance checks.
#[async_trait]
pub trait ServiceUnderTest: Send + Sync {
    /// Sends a request with the given method, path, and headers, and returns the complete response.
    async fn call(&self, method: Method, path: &str, headers: HeaderMap) -> ObservedResponse;

    /// Sends a `GET` request with no extra headers.
    async fn get(&self, path: &str) -> ObservedResponse {
        self.call(Method::GET, path, HeaderMap::new()).await
    }
}

/// Builds a service that draws its random values from the given source.
pub trait ServiceFactory {
    /// Type of service built.
    type Service: ServiceUnderTest;

    /// Builds a fresh service around the given random source.
    fn build(&self, random: SharedRandomSource) -> Self::Service;
}

impl<F, S> ServiceFactory for F
where
    F: Fn(SharedRandomSource) -> S,
    S: ServiceUnderTest,
{
    type Service = S;

    fn build(&self, random: SharedRandomSource) -> S {
        self(random)
    }
}

/// Runs every conformance check against services built by `factory`.
pub async fn run_all<F: ServiceFactory>(factory: &F) {
    check_outcome_distribution(factory, 10_000, 0.03).await;
    check_error_codes(factory, 2_000).await;
    check_health(factory, 200).await;
    check_well_formed(factory, 500).await;
    check_seeded_reproducibility(factory, 10_000).await;
    check_threshold_boundaries(factory).await;
    check_trace_continuation(factory).await;
    check_trace_headers_do_not_affect_outcome(factory).await;
}

/// Checks that the fractions of 200/400/500 responses converge to 0.5/0.3/0.2.
pub async fn check_outcome_distribution<F: ServiceFactory>(factory: &F, calls: usize, tolerance: f64) {
    let service = factory.build(SharedRandomSource::new(SeededRandom::new(0x5eed)));

    let (mut ok, mut client, mut server) = (0usize, 0usize, 0usize);
    for _ in 0..calls {
        match service.get("/").await.status {
            StatusCode::OK => ok += 1,
            StatusCode::BAD_REQUEST => client += 1,
            StatusCode::INTERNAL_SERVER_ERROR => server += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    for (name, count, expected) in [("200", ok, 0.5), ("400", client, 0.3), ("500", server, 0.2)] {
        let observed = count as f64 / calls as f64;
        assert!(
            (observed - expected).abs() <= tolerance,
            "fraction of {} responses was {:.4}, expected {:.2} +/- {:.2}",
            name,
            observed,
            expected,
            tolerance
        );
    }
}

/// Checks that every error response carries an error code from the class matching its status.
pub async fn check_error_codes<F: ServiceFactory>(factory: &F, calls: usize) {
    let client_codes = [ErrorCode::InvalidRequest, ErrorCode::ValidationError, ErrorCode::MissingAuth];
    let server_codes = [ErrorCode::DatabaseError, ErrorCode::ServiceUnavailable, ErrorCode::TimeoutError];

    let service = factory.build(SharedRandomSource::default());
    let mut seen = HashSet::new();

    for _ in 0..calls {
        let response = service.get("/").await;
        match (response.status, response.parse_body()) {
            (StatusCode::OK, ResponseBody::Success(body)) => assert_eq!(body.status, "success"),
            (StatusCode::BAD_REQUEST, ResponseBody::Error(body)) => {
                assert!(client_codes.contains(&body.error), "{} returned with 400", body.error);
                seen.insert(body.error);
            }
            (StatusCode::INTERNAL_SERVER_ERROR, ResponseBody::Error(body)) => {
                assert!(server_codes.contains(&body.error), "{} returned with 500", body.error);
                seen.insert(body.error);
            }
            (status, body) => panic!("status {} does not match body {:?}", status, body),
        }
    }

    // Every scenario is reachable.
    assert_eq!(seen.len(), client_codes.len() + server_codes.len(), "saw only {:?}", seen);
}

/// Checks that the health endpoint always answers 200/healthy, regardless of random state or headers.
pub async fn check_health<F: ServiceFactory>(factory: &F, calls: usize) {
    // A source that would only ever produce server errors, if it were consulted.
    let service = factory.build(SharedRandomSource::new(SequenceRandom::new([0.99])));

    for i in 0..calls {
        let mut headers = HeaderMap::new();
        if i % 2 == 0 {
            headers.insert(DATADOG_TRACE_ID_HEADER, HeaderValue::from_static("123"));
            headers.insert(DATADOG_PARENT_ID_HEADER, HeaderValue::from_static("456"));
        }

        let response = service.call(Method::GET, "/health", headers).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_json_content_type(&response);

        match response.parse_body() {
            ResponseBody::Success(body) => {
                assert_eq!(body.status, "healthy");
                assert_eq!(body.message, "Service is healthy");
                assert!(body.request_id.is_none());
                assert_recent_timestamp(&body.timestamp);
            }
            other => panic!("health returned {:?}", other),
        }
    }
}

/// Checks content type, body shape, timestamps, and request ID uniqueness for root responses.
pub async fn check_well_formed<F: ServiceFactory>(factory: &F, calls: usize) {
    let service = factory.build(SharedRandomSource::default());
    let mut request_ids = HashSet::new();

    for _ in 0..calls {
        let response = service.get("/").await;
        assert_json_content_type(&response);

        let body = response.parse_body();
        assert_recent_timestamp(body.timestamp());

        let request_id = body.request_id().expect("root responses carry a request ID").to_string();
        assert!(request_id.starts_with("req_"), "unexpected request ID format: {}", request_id);
        assert!(request_ids.insert(request_id), "duplicate request ID");
    }
}

/// Checks that two services seeded identically produce the same outcome sequence.
pub async fn check_seeded_reproducibility<F: ServiceFactory>(factory: &F, calls: usize) {
    let first = outcome_sequence(&factory.build(SharedRandomSource::new(SeededRandom::new(42))), calls).await;
    let second = outcome_sequence(&factory.build(SharedRandomSource::new(SeededRandom::new(42))), calls).await;
    let other = outcome_sequence(&factory.build(SharedRandomSource::new(SeededRandom::new(43))), calls).await;

    assert_eq!(first, second, "same seed produced different outcome sequences");
    assert_ne!(first, other, "different seeds produced identical outcome sequences");
}

/// Checks the exact boundary draws: `0.49999` and `0.5`, `0.79999` and `0.8`.
pub async fn check_threshold_boundaries<F: ServiceFactory>(factory: &F) {
    // Error outcomes consume a second draw to pick the scenario, hence the interleaved zeroes.
    let draws = [0.49999, 0.5, 0.0, 0.79999, 0.0, 0.8, 0.0];
    let service = factory.build(SharedRandomSource::new(SequenceRandom::new(draws)));

    let expected = [
        (StatusCode::OK, None),
        (StatusCode::BAD_REQUEST, Some(ErrorCode::InvalidRequest)),
        (StatusCode::BAD_REQUEST, Some(ErrorCode::InvalidRequest)),
        (StatusCode::INTERNAL_SERVER_ERROR, Some(ErrorCode::DatabaseError)),
    ];

    for (status, code) in expected {
        let response = service.get("/").await;
        assert_eq!(response.status, status);

        let observed_code = match response.parse_body() {
            ResponseBody::Success(_) => None,
            ResponseBody::Error(body) => Some(body.error),
        };
        assert_eq!(observed_code, code);
    }
}

/// Checks that propagated trace contexts are continued, and that requests without one start a new trace.
pub async fn check_trace_continuation<F: ServiceFactory>(factory: &F) {
    let service = factory.build(SharedRandomSource::default());

    let mut datadog = HeaderMap::new();
    datadog.insert(DATADOG_TRACE_ID_HEADER, HeaderValue::from_static("1234567890"));
    datadog.insert(DATADOG_PARENT_ID_HEADER, HeaderValue::from_static("987654321"));
    let span = expect_span(service.call(Method::GET, "/", datadog).await);
    assert_eq!(span.context().trace_id(), 1234567890);
    assert_eq!(span.context().parent_id(), 987654321);

    let mut w3c = HeaderMap::new();
    w3c.insert(
        TRACEPARENT_HEADER,
        HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
    );
    let span = expect_span(service.call(Method::GET, "/", w3c).await);
    assert_eq!(span.context().trace_id_hex(), "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(span.context().parent_id(), 0x00f067aa0ba902b7);

    let first = expect_span(service.get("/").await);
    let second = expect_span(service.get("/").await);
    for span in [&first, &second] {
        assert!(span.context().is_root());
        assert_eq!(span.context().parent_id(), 0);
        assert_ne!(span.context().trace_id(), 0);
        assert_ne!(span.context().span_id(), 0);
    }
    assert_ne!(first.context().trace_id(), second.context().trace_id());
}

/// Checks that trace headers, valid or not, never change the selected outcome.
pub async fn check_trace_headers_do_not_affect_outcome<F: ServiceFactory>(factory: &F) {
    let header_sets: [&[(&'static str, &'static str)]; 4] = [
        &[],
        &[(DATADOG_TRACE_ID_HEADER, "1234"), (DATADOG_PARENT_ID_HEADER, "5678")],
        &[(TRACEPARENT_HEADER, "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")],
        &[(DATADOG_TRACE_ID_HEADER, "garbage"), (TRACEPARENT_HEADER, "nope")],
    ];

    for headers in header_sets {
        let service = factory.build(SharedRandomSource::new(SequenceRandom::new([0.6, 0.9])));

        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(value));
        }

        let response = service.call(Method::GET, "/", map).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        match response.parse_body() {
            ResponseBody::Error(body) => assert_eq!(body.error, ErrorCode::MissingAuth),
            other => panic!("expected error body, got {:?}", other),
        }
    }
}

/// Returns the statuses of `calls` consecutive root requests.
pub async fn outcome_sequence<S: ServiceUnderTest>(service: &S, calls: usize) -> Vec<StatusCode> {
    let mut statuses = Vec::with_capacity(calls);
    for _ in 0..calls {
        statuses.push(service.get("/").await.status);
    }
    statuses
}

fn expect_span(response: ObservedResponse) -> FinishedSpan {
    let span = response.span.expect("root responses carry the request span");
    assert_eq!(span.name(), "http.request");
    assert_eq!(span.tag("http.status_code"), Some(response.status.as_str()));
    span
}

fn assert_json_content_type(response: &ObservedResponse) {
    let content_type = response
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert_eq!(content_type, JSON_CONTENT_TYPE);
}

fn assert_recent_timestamp(timestamp: &str) {
    let parsed = DateTime::parse_from_rfc3339(timestamp)
        .unwrap_or_else(|e| panic!("timestamp '{}' is not RFC3339: {}", timestamp, e))
        .with_timezone(&Utc);

    let skew = (Utc::now() - parsed).num_seconds().abs();
    assert!(skew <= MAX_TIMESTAMP_SKEW_SECS, "timestamp '{}' is {}s away from now", timestamp, skew);
}
