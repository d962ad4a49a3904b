use std::fmt;

use chrono::{SecondsFormat, Utc};
use tracing::{field, Event, Subscriber};
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, Layer, MakeWriter},
    layer,
    registry::LookupSpan,
    Layer as _,
};

/// Builds the formatting layer for a single log output.
///
/// JSON output flattens event fields into the top-level object, so a request log line carries `url`, `status_code`,
/// and the trace identifiers as plain keys next to `timestamp`, `level`, and `message`.
pub fn build_formatting_layer<S, W>(
    json: bool, app_name: &str, writer: W,
) -> Box<dyn layer::Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    if json {
        Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        Layer::new()
            .event_format(ConsoleFormatter::new(app_name))
            .with_writer(writer)
            .boxed()
    }
}

/// Single-line, pipe-delimited console format:
///
/// ```text
/// 2024-05-01T12:30:00.123Z | SERVICEA | INFO | (src/generator.rs:210) | status_code:200,method:"GET" | Request processed successfully
/// ```
struct ConsoleFormatter {
    app_name: String,
}

impl ConsoleFormatter {
    fn new(app_name: &str) -> Self {
        // "service-a" or "Service A" both become "SERVICEA".
        let app_name = app_name.to_uppercase().replace(['-', ' ', '_'], "");
        Self { app_name }
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} | {} | {} | ",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            self.app_name,
            metadata.level()
        )?;

        match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => write!(writer, "({}:{})", file, line)?,
            _ => write!(writer, "(unknown:0)")?,
        }

        let mut visitor = ConsoleFieldVisitor::new(writer.by_ref());
        event.record(&mut visitor);
        visitor.finish()?;

        writeln!(writer)
    }
}

/// Writes event fields as `key:value` pairs separated by commas, followed by the message.
///
/// The first write error is remembered and returned from `finish`; every write after it is skipped.
struct ConsoleFieldVisitor<'writer> {
    writer: Writer<'writer>,
    fields_written: usize,
    message: String,
    result: fmt::Result,
}

impl<'writer> ConsoleFieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            fields_written: 0,
            message: String::new(),
            result: Ok(()),
        }
    }

    fn write_field(&mut self, field: &field::Field, value: fmt::Arguments<'_>) {
        if self.result.is_err() {
            return;
        }

        // The message goes last, so hold on to it until `finish`.
        if field.name() == "message" {
            self.result = fmt::Write::write_fmt(&mut self.message, value);
            return;
        }

        let separator = if self.fields_written == 0 { " | " } else { "," };
        self.result = write!(self.writer, "{}{}:{}", separator, field.name(), value);
        if self.result.is_ok() {
            self.fields_written += 1;
        }
    }
}

impl field::Visit for ConsoleFieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.write_field(field, format_args!("{:?}", value));
        } else {
            self.write_field(field, format_args!("\"{:?}\"", value));
        }
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.write_field(field, format_args!("{}", value));
        } else {
            self.write_field(field, format_args!("\"{}\"", value));
        }
    }

    fn record_f64(&mut self, field: &field::Field, value: f64) {
        self.write_field(field, format_args!("{}", value));
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.write_field(field, format_args!("{}", value));
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.write_field(field, format_args!("{}", value));
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.write_field(field, format_args!("{}", value));
    }
}

impl VisitOutput<fmt::Result> for ConsoleFieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.result?;

        if self.message.is_empty() {
            Ok(())
        } else {
            write!(self.writer, " | {}", self.message)
        }
    }
}
