//! Tracing: span creation and trace context propagation.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use http::HeaderMap;
use tracing::debug;

mod context;
pub use self::context::{generate_id, SpanContext, TraceContext, AUTO_KEEP};

pub mod agent;

pub mod propagation;
use self::propagation::ExtractionStyles;

use crate::identity::ServiceIdentity;

/// Receives spans as they finish.
///
/// Implementations are called inline on the request path, so `submit` must never block.
pub trait SpanSink: fmt::Debug + Send + Sync {
    /// Accepts a finished span.
    fn submit(&self, span: &FinishedSpan);
}

/// Creates spans for inbound requests.
///
/// A `Tracer` is built once at startup from the service identity and the configured extraction styles, and then handed
/// to whatever needs to create spans. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct Tracer {
    identity: Arc<ServiceIdentity>,
    extraction_styles: ExtractionStyles,
    sink: Option<Arc<dyn SpanSink>>,
}

impl Tracer {
    /// Creates a new `Tracer`.
    ///
    /// Finished spans are only logged. Use [`with_sink`][Self::with_sink] to ship them somewhere.
    pub fn new(identity: ServiceIdentity, extraction_styles: ExtractionStyles) -> Self {
        Self {
            identity: Arc::new(identity),
            extraction_styles,
            sink: None,
        }
    }

    /// Sets the sink that receives every span finished by this tracer.
    pub fn with_sink(mut self, sink: Arc<dyn SpanSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Returns the identity of the service owning the spans created by this tracer.
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Returns the configured extraction styles.
    pub fn extraction_styles(&self) -> &ExtractionStyles {
        &self.extraction_styles
    }

    /// Extracts an upstream trace context from the given headers.
    ///
    /// Each configured style is tried in order, and the first one that yields a valid context wins. Malformed headers
    /// are logged and skipped rather than failing the request.
    pub fn extract(&self, headers: &HeaderMap) -> Option<TraceContext> {
        for style in self.extraction_styles.styles() {
            match style.extract(headers) {
                Ok(Some(context)) => return Some(context),
                Ok(None) => {}
                Err(e) => debug!(%style, error = %e, "Ignoring invalid trace context headers."),
            }
        }

        None
    }

    /// Starts a span for an inbound request.
    ///
    /// If the headers carry a trace context, the span continues that trace. Otherwise, the span is the root of a new
    /// trace.
    pub fn start_span(&self, name: &'static str, resource: impl Into<String>, headers: &HeaderMap) -> ActiveSpan {
        let context = match self.extract(headers) {
            Some(parent) => SpanContext::child_of(&parent, generate_id()),
            None => SpanContext::new_root(generate_id(), generate_id()),
        };

        ActiveSpan {
            identity: Arc::clone(&self.identity),
            sink: self.sink.clone(),
            context,
            name,
            resource: resource.into(),
            start: Utc::now(),
            started: Instant::now(),
            error: false,
            tags: BTreeMap::new(),
        }
    }
}

/// A span that is currently being recorded.
#[derive(Debug)]
pub struct ActiveSpan {
    identity: Arc<ServiceIdentity>,
    sink: Option<Arc<dyn SpanSink>>,
    context: SpanContext,
    name: &'static str,
    resource: String,
    start: DateTime<Utc>,
    started: Instant,
    error: bool,
    tags: BTreeMap<&'static str, String>,
}

impl ActiveSpan {
    /// Returns the identifiers of this span.
    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    /// Sets a tag, overwriting any previous value.
    pub fn set_tag(&mut self, key: &'static str, value: impl ToString) {
        self.tags.insert(key, value.to_string());
    }

    /// Marks the span as erroneous.
    pub fn set_error(&mut self) {
        self.error = true;
        self.set_tag("error", true);
    }

    /// Finishes the span, handing it to the tracer's sink if one is set.
    pub fn finish(self) -> FinishedSpan {
        let span = FinishedSpan {
            identity: self.identity,
            context: self.context,
            name: self.name,
            resource: self.resource,
            start: self.start,
            duration: self.started.elapsed(),
            error: self.error,
            tags: self.tags,
        };

        debug!(
            service = span.identity.service(),
            env = span.identity.env(),
            version = span.identity.version(),
            name = span.name,
            resource = %span.resource,
            trace_id = span.context.trace_id(),
            span_id = span.context.span_id(),
            parent_id = span.context.parent_id(),
            sampling_priority = span.context.sampling_priority(),
            duration_ns = span.duration.as_nanos() as u64,
            error = span.error,
            tags = ?span.tags,
            "Span finished."
        );

        if let Some(sink) = &self.sink {
            sink.submit(&span);
        }

        span
    }
}

/// A completed span.
#[derive(Clone, Debug)]
pub struct FinishedSpan {
    identity: Arc<ServiceIdentity>,
    context: SpanContext,
    name: &'static str,
    resource: String,
    start: DateTime<Utc>,
    duration: Duration,
    error: bool,
    tags: BTreeMap<&'static str, String>,
}

impl FinishedSpan {
    /// Returns the identity of the service that recorded this span.
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Returns the identifiers of this span.
    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    /// Returns the operation name, such as `http.request`.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Returns the resource, such as `GET /`.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the wall-clock time at which the span started.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns how long the span lasted, measured with a monotonic clock.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns `true` if the span was marked as erroneous.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Returns the value of the given tag, if set.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns all tags, ordered by key.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::trace::propagation::{PropagationStyle, DATADOG_PARENT_ID_HEADER, DATADOG_TRACE_ID_HEADER, TRACEPARENT_HEADER};

    fn tracer(styles: ExtractionStyles) -> Tracer {
        Tracer::new(ServiceIdentity::new("svc", "test", "1.0.0"), styles)
    }

    fn both_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(DATADOG_TRACE_ID_HEADER, HeaderValue::from_static("111"));
        headers.insert(DATADOG_PARENT_ID_HEADER, HeaderValue::from_static("222"));
        headers.insert(
            TRACEPARENT_HEADER,
            HeaderValue::from_static("00-0000000000000000000000000000014d-000000000000029a-01"),
        );
        headers
    }

    #[test]
    fn styles_are_tried_in_order() {
        let datadog_first = tracer(ExtractionStyles::default()).extract(&both_headers()).unwrap();
        assert_eq!((datadog_first.trace_id(), datadog_first.parent_id()), (111, 222));

        let w3c_first = tracer(ExtractionStyles::new(vec![
            PropagationStyle::TraceContext,
            PropagationStyle::Datadog,
        ]))
        .extract(&both_headers())
        .unwrap();
        assert_eq!((w3c_first.trace_id(), w3c_first.parent_id()), (333, 666));

        assert!(tracer(ExtractionStyles::new(Vec::new())).extract(&both_headers()).is_none());
    }

    #[test]
    fn invalid_style_falls_through() {
        let mut headers = both_headers();
        headers.insert(DATADOG_TRACE_ID_HEADER, HeaderValue::from_static("not-a-number"));

        let context = tracer(ExtractionStyles::default()).extract(&headers).unwrap();
        assert_eq!(context.trace_id(), 333);
    }

    #[test]
    fn span_continues_or_starts_trace() {
        let tracer = tracer(ExtractionStyles::default());

        let child = tracer.start_span("http.request", "GET /", &both_headers());
        assert_eq!(child.context().trace_id(), 111);
        assert_eq!(child.context().parent_id(), 222);
        assert_ne!(child.context().span_id(), 0);

        let root = tracer.start_span("http.request", "GET /", &HeaderMap::new());
        assert!(root.context().is_root());
        assert_ne!(root.context().trace_id(), 0);
    }

    #[test]
    fn finished_span_keeps_tags() {
        let tracer = tracer(ExtractionStyles::default());
        let mut span = tracer.start_span("http.request", "GET /", &HeaderMap::new());
        span.set_tag("http.status_code", 500);
        span.set_error();
        span.set_tag("http.status_code", 400);

        let finished = span.finish();
        assert_eq!(finished.name(), "http.request");
        assert_eq!(finished.resource(), "GET /");
        assert_eq!(finished.identity().service(), "svc");
        assert!(finished.is_error());
        assert_eq!(finished.tag("error"), Some("true"));
        assert_eq!(finished.tag("http.status_code"), Some("400"));
        assert_eq!(finished.tag("missing"), None);
        assert_eq!(finished.tags().count(), 2);
    }

    #[derive(Debug, Default)]
    struct RecordingSink(std::sync::Mutex<Vec<FinishedSpan>>);

    impl SpanSink for RecordingSink {
        fn submit(&self, span: &FinishedSpan) {
            self.0.lock().unwrap().push(span.clone());
        }
    }

    #[test]
    fn finished_spans_reach_sink() {
        let sink = Arc::new(RecordingSink::default());
        let tracer = tracer(ExtractionStyles::default()).with_sink(sink.clone());

        let first = tracer.start_span("http.request", "GET /", &both_headers()).finish();
        let second = tracer.clone().start_span("http.request", "GET /", &HeaderMap::new()).finish();

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].context(), first.context());
        assert_eq!(recorded[1].context(), second.context());
    }
}
