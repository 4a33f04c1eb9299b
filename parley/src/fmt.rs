//! Terminal output helpers

use owo_colors::OwoColorize as _;
use std::fmt;
use std::time::Duration;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Compact event format: info messages bare, everything else tagged.
pub struct CliFormatter;

impl<S, N> FormatEvent<S, N> for CliFormatter
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
        let level = *event.metadata().level();
        let target = event.metadata().target();

        if level == Level::ERROR {
            if ansi {
                write!(writer, "{} ", "Error:".red().bold())?;
            } else {
                write!(writer, "Error: ")?;
            }
        } else if level == Level::WARN {
            if ansi {
                write!(writer, "{} ", "Warning:".yellow().bold())?;
            } else {
                write!(writer, "Warning: ")?;
            }
        } else if level != Level::INFO {
            // debug and trace
            let label = level.as_str().to_ascii_lowercase();
            if ansi {
                write!(writer, "{} {} ", label.blue(), target.dimmed())?;
            } else {
                write!(writer, "{} {} ", label, target)?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// "4.20 seconds" under a minute, "3 minutes 7 seconds" above
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64();
    let minutes = total as u64 / 60;
    let seconds = total - (minutes * 60) as f64;
    if minutes == 0 {
        format!("{:.2} seconds", seconds)
    } else {
        format!("{} minutes {:.0} seconds", minutes, seconds)
    }
}
