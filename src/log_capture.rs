//! Tracing layer that keeps recent log events in memory so the client UI can
//! show them while the terminal is in raw mode.

use chrono::Utc;
use std::{
    collections::VecDeque,
    fmt::Write as _,
    sync::{Arc, Mutex},
};
use tracing::Level;
use tracing_subscriber::Layer;

/// Maximum number of events held in the ring buffer.
pub const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone)]
pub struct LogLine {
    pub level: Level,
    pub timestamp: String,
    pub target: String,
    pub message: String,
}

impl LogLine {
    pub fn render(&self) -> String {
        format!(
            "{} {:>5} {} {}",
            self.timestamp, self.level, self.target, self.message
        )
    }
}

/// Shared handle to the ring buffer the UI reads from.
#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<LogLine>>>,
}

impl LogBuffer {
    pub fn push(&self, line: LogLine) {
        // A poisoned lock drops the line; panicking inside a log handler
        // could recurse.
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() >= MAX_LOG_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    /// Copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Writes every event it sees into a [`LogBuffer`].
pub struct CaptureLayer {
    buffer: LogBuffer,
}

/// Build the layer and the buffer it fills. Register the layer before the UI
/// takes over the terminal.
pub fn new() -> (CaptureLayer, LogBuffer) {
    let buffer = LogBuffer::default();
    let layer = CaptureLayer {
        buffer: buffer.clone(),
    };
    (layer, buffer)
}

impl<S: tracing::Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogLine {
            level: *meta.level(),
            timestamp: Utc::now().format("%H:%M:%S%.3f").to_string(),
            target: meta.target().to_string(),
            message: visitor.finish(),
        });
    }
}

/// Collects the `message` field plus any structured fields as `key=value`.
#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: String,
}

impl FieldVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        // Format-string messages arrive here as `fmt::Arguments`, whose Debug
        // output carries no quotes.
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn captures_message_and_fields() {
        let (layer, buffer) = new();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(id = 7, "Blog {} not found", "abc");
            tracing::info!("plain");
        });

        let lines = buffer.snapshot();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].level, Level::WARN);
        assert_eq!(lines[0].message, "Blog abc not found id=7");
        assert_eq!(lines[1].message, "plain");
    }

    #[test]
    fn render_shows_level_target_and_message() {
        let line = LogLine {
            level: Level::WARN,
            timestamp: "12:00:00.000".into(),
            target: "bloglist::controller".into(),
            message: "Could not revoke token".into(),
        };
        assert_eq!(
            line.render(),
            "12:00:00.000  WARN bloglist::controller Could not revoke token"
        );
    }

    #[test]
    fn buffer_is_bounded() {
        let buffer = LogBuffer::default();
        for i in 0..(MAX_LOG_LINES + 5) {
            buffer.push(LogLine {
                level: Level::INFO,
                timestamp: String::new(),
                target: "t".into(),
                message: i.to_string(),
            });
        }
        let lines = buffer.snapshot();
        assert_eq!(lines.len(), MAX_LOG_LINES);
        assert_eq!(lines[0].message, "5");
    }
}
