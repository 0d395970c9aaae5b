// src/logs.rs

//! Capture of log output produced during a single operation
//!
//! Dependency discovery can fail deep inside a download or build. The lines
//! logged on the way there are the best diagnostics a user gets, so they are
//! collected per call and attached to the resulting error.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, debug, error, info, trace, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

/// One captured event: its level and rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
}

impl LogLine {
    /// Emit the line again through the current subscriber, at its own level
    pub fn replay(&self) {
        let message = &self.message;
        if self.level == Level::ERROR {
            error!("{}", message);
        } else if self.level == Level::WARN {
            warn!("{}", message);
        } else if self.level == Level::INFO {
            info!("{}", message);
        } else if self.level == Level::DEBUG {
            debug!("{}", message);
        } else {
            trace!("{}", message);
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message)
    }
}

/// A tracing layer that records every event's message
#[derive(Debug, Clone, Default)]
pub struct LogCollector {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl LogCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lines collected so far
    pub fn take(&self) -> Vec<LogLine> {
        match self.lines.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = LogLine {
            level: *event.metadata().level(),
            message: visitor.finish(),
        };
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Run `f` and return its result with every line it logged at DEBUG or above
///
/// The collecting subscriber is only installed on the current thread for the
/// duration of the call, so nothing `f` logs reaches the caller's subscriber
/// unless the lines are replayed.
pub fn collect_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<LogLine>) {
    let collector = LogCollector::new();
    let subscriber = Registry::default().with(collector.clone().with_filter(LevelFilter::DEBUG));
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, collector.take())
}
