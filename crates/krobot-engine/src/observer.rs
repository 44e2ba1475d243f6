use krobot_contracts::events::{EventPayload, EventWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Callbacks fired from the scheduler's worker thread.
///
/// Implementations must not block for long; anything slow should be handed
/// off to its own thread. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    /// Every non-blank stream line, as received.
    fn on_raw_line(&self, _line: &str) {}

    /// Thinking text, forwarded as soon as it is parsed.
    fn on_thinking(&self, _text: &str) {}

    /// The cleaned answer of a finished round.
    fn on_answer(&self, _answer: &str) {}

    /// Seconds left before the next automatic round.
    fn on_countdown(&self, _remaining_seconds: u64) {}

    /// Fired after every round or scan, successful or not.
    fn on_round_finished(&self) {}

    fn on_log(&self, _level: LogLevel, _message: &str) {}

    fn on_event(&self, _event_type: &str, _payload: EventPayload) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Sends log lines to `tracing` and structured events to an optional
/// `events.jsonl` writer.
#[derive(Debug, Clone, Default)]
pub struct LogObserver {
    events: Option<EventWriter>,
}

impl LogObserver {
    pub fn new(events: Option<EventWriter>) -> Self {
        Self { events }
    }
}

impl Observer for LogObserver {
    fn on_raw_line(&self, line: &str) {
        tracing::trace!(line, "stream line");
    }

    fn on_countdown(&self, remaining_seconds: u64) {
        tracing::debug!(remaining_seconds, "countdown");
    }

    fn on_log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }

    fn on_event(&self, event_type: &str, payload: EventPayload) {
        tracing::debug!(event_type, "event");
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, payload) {
            tracing::warn!(error = %err, event_type, "failed writing event");
        }
    }
}
