use rand::Rng as _;

/// Sampling priority assigned to new root traces: keep, as decided by the tracer.
pub const AUTO_KEEP: i8 = 1;

/// A trace context received from an upstream caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraceContext {
    pub(crate) trace_id: u64,
    pub(crate) trace_id_high: u64,
    pub(crate) parent_id: u64,
    pub(crate) sampling_priority: Option<i8>,
    pub(crate) origin: Option<String>,
}

impl TraceContext {
    /// Creates a new `TraceContext` with a 64-bit trace ID.
    pub fn new(trace_id: u64, parent_id: u64) -> Self {
        Self {
            trace_id,
            trace_id_high: 0,
            parent_id,
            sampling_priority: None,
            origin: None,
        }
    }

    /// Sets the upper 64 bits of a 128-bit trace ID.
    pub fn with_trace_id_high(mut self, trace_id_high: u64) -> Self {
        self.trace_id_high = trace_id_high;
        self
    }

    /// Sets the sampling priority.
    pub fn with_sampling_priority(mut self, sampling_priority: i8) -> Self {
        self.sampling_priority = Some(sampling_priority);
        self
    }

    /// Sets the origin.
    pub fn with_origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Returns the lower 64 bits of the trace ID.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// Returns the upper 64 bits of the trace ID, or zero for 64-bit trace IDs.
    pub fn trace_id_high(&self) -> u64 {
        self.trace_id_high
    }

    /// Returns the ID of the upstream span that this request is a child of.
    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    /// Returns the sampling priority decided upstream, if any.
    pub fn sampling_priority(&self) -> Option<i8> {
        self.sampling_priority
    }

    /// Returns the origin of the trace, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

/// Identifiers of a span owned by this service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpanContext {
    trace_id: u64,
    trace_id_high: u64,
    span_id: u64,
    parent_id: u64,
    sampling_priority: i8,
    origin: Option<String>,
}

impl SpanContext {
    /// Creates the context for a span that continues the given upstream trace.
    pub fn child_of(parent: &TraceContext, span_id: u64) -> Self {
        Self {
            trace_id: parent.trace_id,
            trace_id_high: parent.trace_id_high,
            span_id,
            parent_id: parent.parent_id,
            sampling_priority: parent.sampling_priority.unwrap_or(AUTO_KEEP),
            origin: parent.origin.clone(),
        }
    }

    /// Creates the context for the root span of a new trace.
    pub fn new_root(trace_id: u64, span_id: u64) -> Self {
        Self {
            trace_id,
            trace_id_high: 0,
            span_id,
            parent_id: 0,
            sampling_priority: AUTO_KEEP,
            origin: None,
        }
    }

    /// Returns the lower 64 bits of the trace ID.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// Returns the upper 64 bits of the trace ID, or zero for 64-bit trace IDs.
    pub fn trace_id_high(&self) -> u64 {
        self.trace_id_high
    }

    /// Returns the ID of this span.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Returns the parent span ID, or zero if this is a root span.
    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    /// Returns `true` if this span started a new trace.
    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }

    /// Returns the sampling priority, inherited from upstream or [`AUTO_KEEP`] for new traces.
    pub fn sampling_priority(&self) -> i8 {
        self.sampling_priority
    }

    /// Returns the origin inherited from upstream, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Returns the trace ID as zero-padded lowercase hex.
    ///
    /// 64-bit trace IDs render as 16 hex digits. When the upper 64 bits are set, the full 128-bit ID renders as 32 hex
    /// digits, matching the W3C `traceparent` encoding.
    pub fn trace_id_hex(&self) -> String {
        if self.trace_id_high != 0 {
            format!("{:016x}{:016x}", self.trace_id_high, self.trace_id)
        } else {
            format!("{:016x}", self.trace_id)
        }
    }

    /// Returns the trace ID in the form used to correlate log lines with traces.
    ///
    /// 64-bit trace IDs render in decimal. When the upper 64 bits are set, the full 128-bit ID renders as 32 hex
    /// digits instead, since the lower 64 bits alone do not identify the trace and may even be zero.
    pub fn trace_id_for_logs(&self) -> String {
        if self.trace_id_high != 0 {
            self.trace_id_hex()
        } else {
            self.trace_id.to_string()
        }
    }

    /// Returns the span ID as 16 zero-padded lowercase hex digits.
    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }
}

/// Generates a random, non-zero 64-bit identifier.
pub fn generate_id() -> u64 {
    rand::rng().random_range(1..=u64::MAX)
}
