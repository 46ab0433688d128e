use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

const SERVICE_COLUMN: usize = 20;
const LEVEL_COLUMN: usize = 9;

/// Emit a tracing event tagged with a `component` field, which the
/// formatter shows as `coaps-<component>`.
///
/// ```ignore
/// component_event!(info, "runtime", "Listening on {}", addr);
/// ```
#[macro_export]
macro_rules! component_event {
    ($level:ident, $component:expr, $($arg:tt)*) => {
        tracing::$level!(component = $component, $($arg)*)
    };
}

/// Label and color for one level
fn level_style(level: &Level) -> (&'static str, &'static str) {
    match *level {
        Level::ERROR => ("✗ ERROR", COLOR_BRIGHT_RED),
        Level::WARN => ("⚠ WARN", COLOR_BRIGHT_YELLOW),
        Level::INFO => ("ℹ INFO", COLOR_GREEN),
        Level::DEBUG => ("◦ DEBUG", COLOR_BRIGHT_GRAY),
        Level::TRACE => ("◦ TRACE", COLOR_BRIGHT_GRAY),
    }
}

/// Line formatter: `[timestamp] [service] [level] message`
pub struct CoapsLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl CoapsLogFormatter {
    pub fn new(service_name: String) -> Self {
        Self::with_color(service_name, is_terminal())
    }

    fn with_color(service_name: String, color_enabled: bool) -> Self {
        Self {
            service_name,
            color_enabled,
        }
    }

    fn paint(&self, color: &'static str) -> &'static str {
        if self.color_enabled {
            color
        } else {
            ""
        }
    }

    /// Fixed-width service column
    fn service_column(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(component) => format!("{}-{}", self.service_name, component),
            None => self.service_name.clone(),
        };
        if name.chars().count() <= SERVICE_COLUMN {
            return format!("{:<width$}", name, width = SERVICE_COLUMN);
        }
        let mut truncated: String = name.chars().take(SERVICE_COLUMN - 1).collect();
        truncated.push('…');
        truncated
    }

    fn level_column(&self, level: &Level) -> (String, &'static str) {
        let (label, color) = level_style(level);
        (format!("{:<width$}", label, width = LEVEL_COLUMN), self.paint(color))
    }
}

impl<S, N> FormatEvent<S, N> for CoapsLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let (level, level_color) = self.level_column(event.metadata().level());
        let reset = self.paint(COLOR_RESET);
        writeln!(
            writer,
            "{}[{}] [{}] [{}{}{}] {}{}",
            self.paint(COLOR_CYAN),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            self.service_column(fields.component.as_deref()),
            level_color,
            level,
            reset,
            fields.message,
            reset
        )
    }
}

/// The two fields the formatter prints
#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
}

impl EventFields {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "component" => self.component = Some(value),
            _ => {}
        }
    }
}

impl tracing::field::Visit for EventFields {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.set(field.name(), unquote(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.set(field.name(), value.to_string());
    }
}

/// `Debug` output of a `&str` field carries its quotes
fn unquote(rendered: String) -> String {
    match rendered.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.to_string(),
        None => rendered,
    }
}

/// Color only when TERM names a real terminal
fn is_terminal() -> bool {
    std::env::var("TERM").map_or(false, |term| term != "dumb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_column_padding() {
        let formatter = CoapsLogFormatter::with_color("coaps".to_string(), false);
        let plain = formatter.service_column(None);
        assert_eq!(plain.len(), SERVICE_COLUMN);
        assert!(plain.starts_with("coaps "));

        let tagged = formatter.service_column(Some("runtime"));
        assert!(tagged.starts_with("coaps-runtime"));
        assert_eq!(tagged.len(), SERVICE_COLUMN);
    }

    #[test]
    fn test_long_component_truncated() {
        let formatter = CoapsLogFormatter::with_color("coaps".to_string(), false);
        let name = formatter.service_column(Some("a-very-long-component-name"));
        assert_eq!(name.chars().count(), SERVICE_COLUMN);
        assert!(name.ends_with('…'));
    }

    #[test]
    fn test_level_column() {
        let plain = CoapsLogFormatter::with_color("coaps".to_string(), false);
        let (label, color) = plain.level_column(&Level::WARN);
        assert!(label.starts_with("⚠ WARN"));
        assert_eq!(color, "");

        let colored = CoapsLogFormatter::with_color("coaps".to_string(), true);
        assert_eq!(colored.level_column(&Level::ERROR).1, COLOR_BRIGHT_RED);
    }

    #[test]
    fn test_fields_ignore_others() {
        let mut fields = EventFields::default();
        fields.set("component", "client".to_string());
        fields.set("peer", "[::1]:5683".to_string());
        assert_eq!(fields.component.as_deref(), Some("client"));
        assert!(fields.message.is_empty());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_component_event_line() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .event_format(CoapsLogFormatter::with_color("coaps".to_string(), false))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            crate::component_event!(warn, "client", "Request to {} not sent", "[::1]:5683");
        });

        let line = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(line.contains("] [coaps-client "), "line: {}", line);
        assert!(line.contains("[⚠ WARN"), "line: {}", line);
        assert!(line.trim_end().ends_with("Request to [::1]:5683 not sent"), "line: {}", line);
        assert!(!line.contains('\x1b'));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"runtime\"".to_string()), "runtime");
        assert_eq!(unquote("42".to_string()), "42");
        assert_eq!(unquote("\"".to_string()), "\"");
    }
}
