//! Trace context extraction from inbound request headers.
//!
//! Two styles are supported:
//!
//! - **Datadog**: `x-datadog-trace-id` / `x-datadog-parent-id` (decimal), plus the optional
//!   `x-datadog-sampling-priority`, `x-datadog-origin`, and `x-datadog-tags` headers. The upper 64 bits of a 128-bit
//!   trace ID are carried as the `_dd.p.tid` tag.
//! - **W3C Trace Context**: the `traceparent` header.

use std::{fmt, str::FromStr};

use http::HeaderMap;
use serde::Deserialize;
use snafu::Snafu;

use super::context::TraceContext;

/// Lower 64 bits of the trace ID, in decimal.
pub const DATADOG_TRACE_ID_HEADER: &str = "x-datadog-trace-id";

/// ID of the calling span, in decimal.
pub const DATADOG_PARENT_ID_HEADER: &str = "x-datadog-parent-id";

/// Sampling decision made upstream.
pub const DATADOG_SAMPLING_PRIORITY_HEADER: &str = "x-datadog-sampling-priority";

/// Origin of the trace, such as `synthetics`.
pub const DATADOG_ORIGIN_HEADER: &str = "x-datadog-origin";

/// Propagated trace tags, including the upper 64 bits of the trace ID as `_dd.p.tid`.
pub const DATADOG_TAGS_HEADER: &str = "x-datadog-tags";

/// W3C Trace Context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const TRACE_ID_HIGH_TAG: &str = "_dd.p.tid";

/// A trace context propagation error.
#[derive(Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PropagationError {
    /// A header value could not be read as ASCII text.
    #[snafu(display("Header '{}' contains non-ASCII characters.", header))]
    NonAsciiHeader {
        /// Name of the header.
        header: &'static str,
    },

    /// A header value could not be parsed.
    #[snafu(display("Invalid value '{}' for header '{}'.", value, header))]
    InvalidHeaderValue {
        /// Name of the header.
        header: &'static str,

        /// Raw header value.
        value: String,
    },

    /// A trace ID of zero was received.
    #[snafu(display("Trace ID must not be zero."))]
    ZeroTraceId,

    /// A `traceparent` header did not follow the W3C format.
    #[snafu(display("Malformed traceparent header '{}': {}.", value, reason))]
    MalformedTraceparent {
        /// Raw header value.
        value: String,

        /// What was wrong with it.
        reason: &'static str,
    },

    /// A propagation style name was not recognized.
    #[snafu(display("Unknown propagation style '{}'. Expected 'datadog' or 'tracecontext'.", style))]
    UnknownStyle {
        /// The unrecognized style.
        style: String,
    },
}

/// A trace context propagation style.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PropagationStyle {
    /// Datadog `x-datadog-*` headers.
    Datadog,

    /// W3C `traceparent` header.
    TraceContext,
}

impl PropagationStyle {
    /// Returns the configuration name of this style.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Datadog => "datadog",
            Self::TraceContext => "tracecontext",
        }
    }

    /// Extracts a trace context from the given headers using this style.
    ///
    /// Returns `Ok(None)` if the headers used by this style are not present at all.
    ///
    /// # Errors
    ///
    /// If the headers are present but malformed, an error is returned.
    pub fn extract(&self, headers: &HeaderMap) -> Result<Option<TraceContext>, PropagationError> {
        match self {
            Self::Datadog => extract_datadog(headers),
            Self::TraceContext => extract_traceparent(headers),
        }
    }
}

impl FromStr for PropagationStyle {
    type Err = PropagationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "datadog" => Ok(Self::Datadog),
            "tracecontext" => Ok(Self::TraceContext),
            other => Err(PropagationError::UnknownStyle {
                style: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for PropagationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered list of styles to try when extracting a trace context.
///
/// Parsed from a comma-separated list such as `datadog,tracecontext`. The value `none` disables extraction entirely.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub struct ExtractionStyles(Vec<PropagationStyle>);

impl ExtractionStyles {
    /// Creates a new `ExtractionStyles` from the given styles, in priority order.
    pub fn new(styles: Vec<PropagationStyle>) -> Self {
        Self(styles)
    }

    /// Returns the styles in priority order.
    pub fn styles(&self) -> &[PropagationStyle] {
        &self.0
    }
}

impl Default for ExtractionStyles {
    fn default() -> Self {
        Self(vec![PropagationStyle::Datadog, PropagationStyle::TraceContext])
    }
}

impl FromStr for ExtractionStyles {
    type Err = PropagationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("none") {
            return Ok(Self(Vec::new()));
        }

        let mut styles = Vec::new();
        for raw in s.split(',').filter(|raw| !raw.trim().is_empty()) {
            let style = raw.parse::<PropagationStyle>()?;
            if !styles.contains(&style) {
                styles.push(style);
            }
        }

        Ok(Self(styles))
    }
}

impl TryFrom<String> for ExtractionStyles {
    type Error = PropagationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ExtractionStyles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }

        for (i, style) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(style.as_str())?;
        }
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, header: &'static str) -> Result<Option<&'a str>, PropagationError> {
    match headers.get(header) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| PropagationError::NonAsciiHeader { header }),
    }
}

fn parse_header<T: FromStr>(headers: &HeaderMap, header: &'static str) -> Result<Option<T>, PropagationError> {
    match header_str(headers, header)? {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| PropagationError::InvalidHeaderValue {
            header,
            value: raw.to_string(),
        }),
    }
}

fn extract_datadog(headers: &HeaderMap) -> Result<Option<TraceContext>, PropagationError> {
    let trace_id = match parse_header::<u64>(headers, DATADOG_TRACE_ID_HEADER)? {
        Some(0) => return Err(PropagationError::ZeroTraceId),
        Some(trace_id) => trace_id,
        None => return Ok(None),
    };

    // Synthetic requests may start a trace without a parent span, so a missing parent ID is allowed.
    let parent_id = parse_header::<u64>(headers, DATADOG_PARENT_ID_HEADER)?.unwrap_or(0);
    let mut context = TraceContext::new(trace_id, parent_id);

    if let Some(priority) = parse_header::<i8>(headers, DATADOG_SAMPLING_PRIORITY_HEADER)? {
        context = context.with_sampling_priority(priority);
    }

    if let Some(origin) = header_str(headers, DATADOG_ORIGIN_HEADER)?.filter(|o| !o.is_empty()) {
        context = context.with_origin(origin);
    }

    if let Some(tags) = header_str(headers, DATADOG_TAGS_HEADER)? {
        let tid = tags
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim() == TRACE_ID_HIGH_TAG)
            .map(|(_, value)| value.trim());

        if let Some(tid) = tid {
            let high = parse_hex_u64(tid).ok_or_else(|| PropagationError::InvalidHeaderValue {
                header: DATADOG_TAGS_HEADER,
                value: tags.to_string(),
            })?;
            context = context.with_trace_id_high(high);
        }
    }

    Ok(Some(context))
}

fn extract_traceparent(headers: &HeaderMap) -> Result<Option<TraceContext>, PropagationError> {
    let raw = match header_str(headers, TRACEPARENT_HEADER)? {
        Some(raw) => raw,
        None => return Ok(None),
    };

    let malformed = |reason| PropagationError::MalformedTraceparent {
        value: raw.to_string(),
        reason,
    };

    let parts = raw.split('-').collect::<Vec<_>>();
    if parts.len() < 4 {
        return Err(malformed("expected four dash-separated fields"));
    }

    let (version, trace_id, parent_id, flags) = (parts[0], parts[1], parts[2], parts[3]);
    if version.len() != 2 || !is_lower_hex(version) || version == "ff" {
        return Err(malformed("invalid version"));
    }
    if version == "00" && parts.len() != 4 {
        return Err(malformed("version 00 must have exactly four fields"));
    }
    if trace_id.len() != 32 || !is_lower_hex(trace_id) {
        return Err(malformed("trace ID must be 32 lowercase hex digits"));
    }
    if parent_id.len() != 16 || !is_lower_hex(parent_id) {
        return Err(malformed("parent ID must be 16 lowercase hex digits"));
    }
    if flags.len() != 2 || !is_lower_hex(flags) {
        return Err(malformed("flags must be 2 lowercase hex digits"));
    }

    let trace_id_high = parse_hex_u64(&trace_id[..16]).ok_or_else(|| malformed("invalid trace ID"))?;
    let trace_id_low = parse_hex_u64(&trace_id[16..]).ok_or_else(|| malformed("invalid trace ID"))?;
    if trace_id_high == 0 && trace_id_low == 0 {
        return Err(malformed("trace ID must not be all zeroes"));
    }

    let parent_id = parse_hex_u64(parent_id).ok_or_else(|| malformed("invalid parent ID"))?;
    if parent_id == 0 {
        return Err(malformed("parent ID must not be all zeroes"));
    }

    let flags = u8::from_str_radix(flags, 16).map_err(|_| malformed("invalid flags"))?;
    let sampled = flags & 0x01 == 0x01;

    Ok(Some(
        TraceContext::new(trace_id_low, parent_id)
            .with_trace_id_high(trace_id_high)
            .with_sampling_priority(if sampled { 1 } else { 0 }),
    ))
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    if s.len() != 16 {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn datadog_full() {
        let map = headers(&[
            (DATADOG_TRACE_ID_HEADER, "1234567890"),
            (DATADOG_PARENT_ID_HEADER, "987654321"),
            (DATADOG_SAMPLING_PRIORITY_HEADER, "2"),
            (DATADOG_ORIGIN_HEADER, "synthetics"),
            (DATADOG_TAGS_HEADER, "_dd.p.dm=-4,_dd.p.tid=640cfd8d00000000"),
        ]);

        let context = PropagationStyle::Datadog.extract(&map).unwrap().unwrap();
        assert_eq!(context.trace_id(), 1234567890);
        assert_eq!(context.parent_id(), 987654321);
        assert_eq!(context.sampling_priority(), Some(2));
        assert_eq!(context.origin(), Some("synthetics"));
        assert_eq!(context.trace_id_high(), 0x640cfd8d00000000);
    }

    #[test]
    fn datadog_minimal_and_absent() {
        let map = headers(&[(DATADOG_TRACE_ID_HEADER, "17")]);
        let context = PropagationStyle::Datadog.extract(&map).unwrap().unwrap();
        assert_eq!(context, TraceContext::new(17, 0));

        assert_eq!(PropagationStyle::Datadog.extract(&HeaderMap::new()), Ok(None));
    }

    #[test]
    fn datadog_invalid() {
        let zero = headers(&[(DATADOG_TRACE_ID_HEADER, "0"), (DATADOG_PARENT_ID_HEADER, "1")]);
        assert_eq!(PropagationStyle::Datadog.extract(&zero), Err(PropagationError::ZeroTraceId));

        let garbage = headers(&[(DATADOG_TRACE_ID_HEADER, "abc")]);
        assert!(matches!(
            PropagationStyle::Datadog.extract(&garbage),
            Err(PropagationError::InvalidHeaderValue { header: DATADOG_TRACE_ID_HEADER, .. })
        ));

        let bad_tid = headers(&[(DATADOG_TRACE_ID_HEADER, "5"), (DATADOG_TAGS_HEADER, "_dd.p.tid=xyz")]);
        assert!(matches!(
            PropagationStyle::Datadog.extract(&bad_tid),
            Err(PropagationError::InvalidHeaderValue { header: DATADOG_TAGS_HEADER, .. })
        ));
    }

    #[test]
    fn traceparent_valid() {
        let map = headers(&[(TRACEPARENT_HEADER, "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")]);
        let context = PropagationStyle::TraceContext.extract(&map).unwrap().unwrap();

        assert_eq!(context.trace_id_high(), 0x4bf92f3577b34da6);
        assert_eq!(context.trace_id(), 0xa3ce929d0e0e4736);
        assert_eq!(context.parent_id(), 0x00f067aa0ba902b7);
        assert_eq!(context.sampling_priority(), Some(1));

        let unsampled = headers(&[(TRACEPARENT_HEADER, "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00")]);
        let context = PropagationStyle::TraceContext.extract(&unsampled).unwrap().unwrap();
        assert_eq!(context.sampling_priority(), Some(0));

        // Future versions may append fields.
        let future = headers(&[(TRACEPARENT_HEADER, "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra")]);
        assert!(PropagationStyle::TraceContext.extract(&future).unwrap().is_some());
    }

    #[test]
    fn traceparent_invalid() {
        let cases = [
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-4bf92f35-00f067aa0ba902b7-01",
        ];

        for case in cases {
            let map = headers(&[(TRACEPARENT_HEADER, case)]);
            assert!(
                matches!(
                    PropagationStyle::TraceContext.extract(&map),
                    Err(PropagationError::MalformedTraceparent { .. })
                ),
                "expected '{}' to be rejected",
                case
            );
        }
    }

    #[test]
    fn style_lists() {
        let styles = "Datadog, tracecontext".parse::<ExtractionStyles>().unwrap();
        assert_eq!(
            styles.styles(),
            &[PropagationStyle::Datadog, PropagationStyle::TraceContext]
        );
        assert_eq!(styles.to_string(), "datadog,tracecontext");

        let reversed = "tracecontext,datadog,tracecontext".parse::<ExtractionStyles>().unwrap();
        assert_eq!(
            reversed.styles(),
            &[PropagationStyle::TraceContext, PropagationStyle::Datadog]
        );

        let none = "none".parse::<ExtractionStyles>().unwrap();
        assert!(none.styles().is_empty());
        assert_eq!(none.to_string(), "none");

        assert_eq!(
            "b3".parse::<ExtractionStyles>(),
            Err(PropagationError::UnknownStyle { style: "b3".to_string() })
        );
        assert_eq!(ExtractionStyles::default().to_string(), "datadog,tracecontext");
    }
}
