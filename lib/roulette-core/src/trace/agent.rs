//! Encoding of finished spans for the Datadog Agent trace intake.

use std::collections::BTreeMap;

use serde::Serialize;

use super::FinishedSpan;

/// Path of the Agent's trace intake endpoint.
pub const AGENT_TRACES_PATH: &str = "/v0.4/traces";

/// Default port of the Agent's trace intake.
pub const DEFAULT_AGENT_PORT: u16 = 8126;

/// Span type reported for inbound HTTP requests.
const WEB_SPAN_TYPE: &str = "web";

#[derive(Serialize)]
struct AgentSpan<'a> {
    service: &'a str,
    name: &'a str,
    resource: &'a str,
    trace_id: u64,
    span_id: u64,
    parent_id: u64,
    start: i64,
    duration: i64,
    error: i32,
    #[serde(rename = "type")]
    span_type: &'static str,
    meta: BTreeMap<&'a str, String>,
    metrics: BTreeMap<&'static str, f64>,
}

impl<'a> AgentSpan<'a> {
    fn from_finished(span: &'a FinishedSpan) -> Self {
        let context = span.context();
        let identity = span.identity();

        let mut meta = span.tags().map(|(k, v)| (k, v.to_string())).collect::<BTreeMap<_, _>>();
        meta.insert("env", identity.env().to_string());
        meta.insert("version", identity.version().to_string());
        if context.trace_id_high() != 0 {
            meta.insert("_dd.p.tid", format!("{:016x}", context.trace_id_high()));
        }
        if let Some(origin) = context.origin() {
            meta.insert("_dd.origin", origin.to_string());
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("_sampling_priority_v1", f64::from(context.sampling_priority()));
        metrics.insert("_dd.top_level", 1.0);

        Self {
            service: identity.service(),
            name: span.name(),
            resource: span.resource(),
            trace_id: context.trace_id(),
            span_id: context.span_id(),
            parent_id: context.parent_id(),
            start: span.start().timestamp_nanos_opt().unwrap_or_default(),
            duration: i64::try_from(span.duration().as_nanos()).unwrap_or(i64::MAX),
            error: i32::from(span.is_error()),
            span_type: WEB_SPAN_TYPE,
            meta,
            metrics,
        }
    }
}

/// An encoded batch of traces, ready to be sent to the Agent.
#[derive(Debug)]
pub struct TracePayload {
    body: Vec<u8>,
    trace_count: usize,
    span_count: usize,
}

impl TracePayload {
    /// Encodes the given spans as a JSON trace payload.
    ///
    /// Spans are grouped into traces by their full 128-bit trace ID. The payload is an array of traces, each of which
    /// is an array of spans, as accepted by the Agent's `v0.4` intake with a JSON content type.
    ///
    /// # Errors
    ///
    /// If the spans cannot be serialized, an error is returned.
    pub fn encode(spans: &[FinishedSpan]) -> Result<Self, serde_json::Error> {
        let mut traces = BTreeMap::<(u64, u64), Vec<AgentSpan<'_>>>::new();
        for span in spans {
            let context = span.context();
            traces
                .entry((context.trace_id_high(), context.trace_id()))
                .or_default()
                .push(AgentSpan::from_finished(span));
        }

        let trace_count = traces.len();
        let body = serde_json::to_vec(&traces.into_values().collect::<Vec<_>>())?;

        Ok(Self {
            body,
            trace_count,
            span_count: spans.len(),
        })
    }

    /// Returns the number of traces in this payload.
    pub fn trace_count(&self) -> usize {
        self.trace_count
    }

    /// Returns the number of spans in this payload.
    pub fn span_count(&self) -> usize {
        self.span_count
    }

    /// Consumes the payload and returns the encoded body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}
