//! Compact, colored single-line event format for interactive terminals.

use chrono::Local;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;
use yansi::{Paint, Style};

const DIM: Style = Style::new().dim();
const SPAN: Style = Style::new().bold();

/// `12:04:05.123 INFO  elect{profile_id=5}: eams::engine: message key=value`
pub struct CustomPrettyFormatter;

impl<S, N> FormatEvent<S, N> for CustomPrettyFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let ansi = writer.has_ansi_escapes();
        let meta = event.metadata();

        let timestamp = Local::now().format("%H:%M:%S%.3f").to_string();
        write_styled(&mut writer, ansi, &timestamp, DIM)?;
        writer.write_char(' ')?;
        write_styled(
            &mut writer,
            ansi,
            &format!("{:<5}", meta.level().as_str()),
            level_style(meta.level()),
        )?;
        writer.write_char(' ')?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write_styled(&mut writer, ansi, span.name(), SPAN)?;
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>()
                    && !fields.is_empty()
                {
                    write!(writer, "{{{fields}}}")?;
                }
                writer.write_str(": ")?;
            }
        }

        write_styled(&mut writer, ansi, short_target(meta.target()), DIM)?;
        writer.write_str(": ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn write_styled(writer: &mut Writer<'_>, ansi: bool, value: &str, style: Style) -> fmt::Result {
    if ansi {
        write!(writer, "{}", value.paint(style))
    } else {
        write!(writer, "{value}")
    }
}

fn level_style(level: &Level) -> Style {
    match *level {
        Level::ERROR => Style::new().red().bold(),
        Level::WARN => Style::new().yellow().bold(),
        Level::INFO => Style::new().green(),
        Level::DEBUG => Style::new().blue(),
        Level::TRACE => Style::new().magenta(),
    }
}

/// Drop the crate prefix from a target: `suep_toolkit::eams::engine` -> `eams::engine`.
fn short_target(target: &str) -> &str {
    target.strip_prefix("suep_toolkit::").unwrap_or(target)
}
