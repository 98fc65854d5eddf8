use std::{
    fmt::{self, Write as _},
    str::FromStr as _,
    sync::OnceLock,
};

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{field, Event, Subscriber};
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, Layer, MakeWriter},
    layer,
    registry::LookupSpan,
    Layer as _,
};

use super::LoggingConfiguration;

pub(super) fn build_formatting_layer<S, W>(
    config: &LoggingConfiguration, app_name: &str, writer: W,
) -> Box<dyn layer::Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    if config.log_format_json {
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
            .event_format(PipeFormatter::new(app_name))
            .with_writer(writer)
            .boxed()
    }
}

/// Formats events as pipe-delimited lines.
///
/// ```text
/// 2024-04-20 01:00:00 UTC | PAGELOG | WARN | (lib/pagelog-components/src/adapters/streaming.rs:310) | batch_id:"app.log-0000000001-5e1c0a9b72d4f368" | Failed to commit batch.
/// ```
///
/// The structured field section is omitted when an event carries no fields besides its message.
pub(super) struct PipeFormatter {
    app_name: String,
}

impl PipeFormatter {
    pub(super) fn new(app_name: &str) -> Self {
        // "page-log" and "Page Log" both become "PAGELOG".
        let app_name = app_name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_uppercase();

        Self { app_name }
    }
}

impl<S, N> FormatEvent<S, N> for PipeFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();
        write!(writer, "{} | {} | {} | ", formatted_now(), self.app_name, metadata.level())?;

        match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => write!(writer, "({}:{})", file, line)?,
            _ => writer.write_str("(unknown:0)")?,
        }

        let mut visitor = PipeFieldVisitor::new(writer.by_ref());
        event.record(&mut visitor);
        visitor.finish()?;

        writeln!(writer)
    }
}

/// Writes event fields as `key:value` pairs joined by commas, followed by the message.
///
/// String and debug values are quoted; numbers and booleans are not. The message is buffered while fields are visited
/// because it always comes last. The first write error is kept and returned from `finish`, and turns every later
/// write into a no-op.
struct PipeFieldVisitor<'writer> {
    writer: Writer<'writer>,
    fields_written: usize,
    message: String,
    result: fmt::Result,
}

impl<'writer> PipeFieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            fields_written: 0,
            message: String::new(),
            result: Ok(()),
        }
    }

    fn write_value(&mut self, field: &field::Field, value: fmt::Arguments<'_>) {
        if self.result.is_err() {
            return;
        }

        if field.name() == "message" {
            self.result = self.message.write_fmt(value);
            return;
        }

        let separator = if self.fields_written == 0 { " | " } else { "," };
        self.result = write!(self.writer, "{}{}:{}", separator, field.name(), value);
        if self.result.is_ok() {
            self.fields_written += 1;
        }
    }
}

impl field::Visit for PipeFieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.write_value(field, format_args!("{:?}", value));
        } else {
            self.write_value(field, format_args!("\"{:?}\"", value));
        }
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "message" {
            self.write_value(field, format_args!("{}", value));
        } else {
            self.write_value(field, format_args!("\"{}\"", value));
        }
    }

    fn record_f64(&mut self, field: &field::Field, value: f64) {
        self.write_value(field, format_args!("{}", value));
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.write_value(field, format_args!("{}", value));
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.write_value(field, format_args!("{}", value));
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.write_value(field, format_args!("{}", value));
    }
}

impl VisitOutput<fmt::Result> for PipeFieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.result?;

        if self.message.is_empty() {
            Ok(())
        } else {
            write!(self.writer, " | {}", self.message)
        }
    }
}

/// Formats the current time in the system time zone, such as `2024-12-31 23:59:59 UTC`.
///
/// Falls back to UTC if the system time zone cannot be determined.
fn formatted_now() -> impl fmt::Display {
    static SYSTEM_TZ: OnceLock<Tz> = OnceLock::new();
    let system_tz = SYSTEM_TZ.get_or_init(|| {
        iana_time_zone::get_timezone()
            .ok()
            .and_then(|raw_tz| Tz::from_str(&raw_tz).ok())
            .unwrap_or(Tz::UTC)
    });

    Utc::now().with_timezone(system_tz).format("%Y-%m-%d %H:%M:%S %Z")
}
