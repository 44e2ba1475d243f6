#![allow(dead_code)]

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use krobot_contracts::events::EventPayload;
use krobot_engine::{LogLevel, Observer};

/// Observer that keeps every callback for later assertions.
#[derive(Default)]
pub struct Recorder {
    pub logs: Mutex<Vec<(LogLevel, String)>>,
    pub events: Mutex<Vec<String>>,
    pub countdowns: Mutex<Vec<u64>>,
    pub thinking: Mutex<String>,
    pub answers: Mutex<Vec<String>>,
    pub raw_lines: Mutex<Vec<String>>,
    pub rounds_finished: Mutex<usize>,
}

impl Recorder {
    pub fn log_lines(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn has_log(&self, needle: &str) -> bool {
        self.log_lines().iter().any(|line| line.contains(needle))
    }

    pub fn event_count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| seen.as_str() == event_type)
            .count()
    }

    pub fn rounds_finished(&self) -> usize {
        *self.rounds_finished.lock().unwrap()
    }
}

impl Observer for Recorder {
    fn on_raw_line(&self, line: &str) {
        self.raw_lines.lock().unwrap().push(line.to_string());
    }

    fn on_thinking(&self, text: &str) {
        self.thinking.lock().unwrap().push_str(text);
    }

    fn on_answer(&self, answer: &str) {
        self.answers.lock().unwrap().push(answer.to_string());
    }

    fn on_countdown(&self, remaining_seconds: u64) {
        self.countdowns.lock().unwrap().push(remaining_seconds);
    }

    fn on_round_finished(&self) {
        *self.rounds_finished.lock().unwrap() += 1;
    }

    fn on_log(&self, level: LogLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn on_event(&self, event_type: &str, _payload: EventPayload) {
        self.events.lock().unwrap().push(event_type.to_string());
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}
