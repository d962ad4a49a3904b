//! Response generation.

use std::net::SocketAddr;

use bytes::Bytes;
use chrono::Utc;
use http::{
    header::{CONTENT_TYPE, USER_AGENT},
    HeaderMap, HeaderValue, Method, Request, Response, StatusCode,
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    outcome::OutcomeClass,
    random::{RandomSource as _, SharedRandomSource},
    response::{ErrorResponse, SuccessResponse},
    scenario::{pick_scenario, ErrorScenario},
    trace::{FinishedSpan, Tracer},
};

/// Name of the span created for every root request.
pub const REQUEST_SPAN_NAME: &str = "http.request";

/// MIME type of every response body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// The parts of an inbound request that the generator cares about.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    /// Request method.
    pub method: Method,

    /// Request target as received, including the query string.
    pub url: String,

    /// Path component of the request target.
    pub path: String,

    /// Address of the peer, if known.
    pub remote_addr: Option<SocketAddr>,

    /// Value of the `User-Agent` header, if present and valid UTF-8.
    pub user_agent: Option<String>,

    /// All request headers, used for trace context extraction.
    pub headers: HeaderMap,
}

impl RequestInfo {
    /// Captures the relevant parts of the given request.
    ///
    /// The body is ignored. `remote_addr` is supplied separately since it belongs to the connection, not the request.
    pub fn from_request<B>(request: &Request<B>, remote_addr: Option<SocketAddr>) -> Self {
        let user_agent = request
            .headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Self {
            method: request.method().clone(),
            url: request.uri().to_string(),
            path: request.uri().path().to_string(),
            remote_addr,
            user_agent,
            headers: request.headers().clone(),
        }
    }
}

/// A fully-serialized response, ready to be written by the host server.
#[derive(Debug)]
pub struct GeneratedResponse {
    status: StatusCode,
    outcome: Option<OutcomeClass>,
    body: Bytes,
    span: Option<FinishedSpan>,
}

impl GeneratedResponse {
    /// Returns the HTTP status of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the outcome class selected for this response.
    ///
    /// Only root responses have an outcome: health responses return `None`.
    pub fn outcome(&self) -> Option<OutcomeClass> {
        self.outcome
    }

    /// Returns the serialized JSON body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the span recorded while generating this response, if any.
    pub fn span(&self) -> Option<&FinishedSpan> {
        self.span.as_ref()
    }

    /// Converts this response into an HTTP response with the JSON content type set.
    ///
    /// The finished span, if any, is attached as a response extension so that in-process callers can inspect it. It is
    /// never written to the wire.
    pub fn into_http_response(self) -> Response<Bytes> {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        if let Some(span) = self.span {
            response.extensions_mut().insert(span);
        }
        response
    }
}

enum Selection {
    Success,
    Error {
        class: OutcomeClass,
        scenario: &'static ErrorScenario,
    },
}

/// Fields shared by every per-request log line.
struct RequestLog {
    url: String,
    method: String,
    remote_addr: String,
    request_id: String,
    user_agent: String,
    trace_id: u64,
    trace_id_hex: String,
    trace_id_for_logs: String,
    span_id: u64,
    span_id_hex: String,
}

// Emits the per-request log line at the given level, with the common request fields followed by any extra fields.
macro_rules! log_request {
    ($level:ident, $service:expr, $log:expr, $($extra:tt)*) => {
        tracing::$level!(
            url = %$log.url,
            method = %$log.method,
            remote_addr = %$log.remote_addr,
            request_id = %$log.request_id,
            user_agent = %$log.user_agent,
            trace_id_dec = $log.trace_id,
            trace_id_hex = %$log.trace_id_hex,
            span_id_dec = $log.span_id,
            span_id_hex = %$log.span_id_hex,
            dd.trace_id = %$log.trace_id_for_logs,
            dd.span_id = $log.span_id,
            dd.service = $service.service(),
            dd.env = $service.env(),
            dd.version = $service.version(),
            $($extra)*
        )
    };
}

/// Generates randomized responses for the root endpoint, and static responses for the health endpoint.
///
/// Each root request draws one value from the random source to pick an [`OutcomeClass`], and a second value to pick an
/// [`ErrorScenario`] when the outcome is an error. Nothing is shared between requests other than the random source
/// and the tracer, so the generator can be cloned freely and called concurrently.
#[derive(Clone, Debug)]
pub struct ResponseGenerator {
    tracer: Tracer,
    random: SharedRandomSource,
}

impl ResponseGenerator {
    /// Creates a new `ResponseGenerator`.
    pub fn new(tracer: Tracer, random: SharedRandomSource) -> Self {
        Self { tracer, random }
    }

    /// Returns the tracer used to record request spans.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Handles a request to the root endpoint.
    ///
    /// Never fails: simulated errors are returned as regular responses with a 4xx/5xx status.
    pub fn handle_root(&self, request: &RequestInfo) -> GeneratedResponse {
        let resource = format!("{} {}", request.method, request.path);
        let mut span = self.tracer.start_span(REQUEST_SPAN_NAME, resource, &request.headers);

        let request_id = generate_request_id();
        span.set_tag("request.id", &request_id);
        span.set_tag("http.method", &request.method);
        span.set_tag("http.url", &request.url);

        let context = span.context();
        let log = RequestLog {
            url: request.url.clone(),
            method: request.method.to_string(),
            remote_addr: request.remote_addr.map(|addr| addr.to_string()).unwrap_or_default(),
            request_id: request_id.clone(),
            user_agent: request.user_agent.clone().unwrap_or_default(),
            trace_id: context.trace_id(),
            trace_id_hex: context.trace_id_hex(),
            trace_id_for_logs: context.trace_id_for_logs(),
            span_id: context.span_id(),
            span_id_hex: context.span_id_hex(),
        };
        let identity = self.tracer.identity();

        let (outcome, status, body) = match self.select() {
            Selection::Success => {
                let status = OutcomeClass::Success.status_code();
                span.set_tag("http.status_code", status.as_u16());

                log_request!(
                    info,
                    identity,
                    log,
                    status_code = status.as_u16(),
                    outcome = OutcomeClass::Success.as_str(),
                    response = "success",
                    "Request processed successfully"
                );

                let body = SuccessResponse::success(request_id, Utc::now());
                (OutcomeClass::Success, status, serialize_body(&body))
            }
            Selection::Error { class, scenario } => {
                let status = scenario.status_code;
                span.set_tag("http.status_code", status.as_u16());
                span.set_error();
                span.set_tag("error.type", class.as_str());
                span.set_tag("error.code", scenario.error_code);
                span.set_tag("error.message", scenario.message);

                let message = match class {
                    OutcomeClass::ClientError => "Client error occurred",
                    _ => "Server error occurred",
                };
                log_request!(
                    error,
                    identity,
                    log,
                    status_code = status.as_u16(),
                    outcome = class.as_str(),
                    error_code = %scenario.error_code,
                    error_message = scenario.message,
                    error_reason = scenario.reason,
                    error_type = class.as_str(),
                    "{}",
                    message
                );

                let body = ErrorResponse::from_scenario(scenario, request_id, Utc::now());
                (class, status, serialize_body(&body))
            }
        };

        GeneratedResponse {
            status,
            outcome: Some(outcome),
            body,
            span: Some(span.finish()),
        }
    }

    /// Handles a request to the health endpoint.
    ///
    /// Always returns `200 OK`. No random values are drawn and no span is created.
    pub fn handle_health(&self) -> GeneratedResponse {
        GeneratedResponse {
            status: StatusCode::OK,
            outcome: None,
            body: serialize_body(&SuccessResponse::healthy(Utc::now())),
            span: None,
        }
    }

    fn select(&self) -> Selection {
        match OutcomeClass::from_draw(self.random.next_uniform()) {
            OutcomeClass::Success => Selection::Success,
            class => match pick_scenario(class, self.random.next_uniform()) {
                Some(scenario) => Selection::Error { class, scenario },
                None => Selection::Success,
            },
        }
    }
}

/// Generates a unique, time-ordered request ID such as `req_01907f4c3a7b7cc2a5d2b9d0c8b1e4f3`.
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::now_v7().simple())
}

fn serialize_body<T: Serialize>(body: &T) -> Bytes {
    match serde_json::to_vec(body) {
        Ok(buf) => Bytes::from(buf),
        Err(e) => {
            error!(error = %e, "Failed to serialize response body.");
            Bytes::from_static(b"{}")
        }
    }
}
