use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use krobot_contracts::events::payload;
use rand::Rng;
use serde_json::json;

use crate::error_chain_text;
use crate::observer::{LogLevel, Observer};

const SKIP_MESSAGE: &str = "previous round not finished, skipping";

/// Flags shared between the scheduler handle and its worker.
///
/// `processing` is only ever set through a compare-and-swap so that at most
/// one round runs at a time, whoever triggered it.
#[derive(Debug, Default)]
pub struct ScheduleState {
    running: AtomicBool,
    processing: AtomicBool,
    remaining_seconds: AtomicU64,
}

impl ScheduleState {
    /// Whether the automatic loop is armed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a round is executing or claimed to execute.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds.load(Ordering::SeqCst)
    }

    fn arm(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn disarm(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    fn try_claim(&self) -> bool {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.processing.store(false, Ordering::SeqCst);
    }

    fn set_remaining(&self, seconds: u64) {
        self.remaining_seconds.store(seconds, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTrigger {
    Loop,
    AdHoc,
}

impl RoundTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loop => "loop",
            Self::AdHoc => "ad_hoc",
        }
    }
}

/// What a [`RoundRunner`] sees while executing one round.
pub struct RoundContext<'a> {
    pub trigger: RoundTrigger,
    /// Caller-supplied input for ad-hoc rounds.
    pub input: Option<String>,
    pub observer: &'a dyn Observer,
    state: &'a ScheduleState,
}

impl<'a> RoundContext<'a> {
    pub fn new(
        trigger: RoundTrigger,
        input: Option<String>,
        state: &'a ScheduleState,
        observer: &'a dyn Observer,
    ) -> Self {
        Self {
            trigger,
            input,
            observer,
            state,
        }
    }

    /// Long rounds poll this between units of work. Loop rounds stop once
    /// the loop is disarmed; ad-hoc rounds always run to the end.
    pub fn keep_going(&self) -> bool {
        match self.trigger {
            RoundTrigger::Loop => self.state.is_running(),
            RoundTrigger::AdHoc => true,
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.observer.on_log(level, message);
    }
}

/// One unit of scheduled work: a chat round or an inspection scan.
pub trait RoundRunner: Send + 'static {
    fn name(&self) -> &str;

    fn run_round(&mut self, ctx: &RoundContext<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub max_seconds: u64,
    pub randomize: bool,
    /// Length of one countdown step. One second outside of tests.
    pub tick: Duration,
}

impl Cadence {
    pub fn new(max_seconds: u64, randomize: bool) -> Self {
        Self {
            max_seconds,
            randomize,
            tick: Duration::from_secs(1),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// Seconds to wait before the next automatic round: `max(1, max_seconds)`,
/// or a uniform draw from `[1, max(1, max_seconds)]` when randomized.
pub fn next_interval<R: Rng + ?Sized>(max_seconds: u64, randomize: bool, rng: &mut R) -> u64 {
    let max = max_seconds.max(1);
    if randomize {
        rng.random_range(1..=max)
    } else {
        max
    }
}

enum Command {
    StartLoop,
    RunOnce(Option<String>),
    StopLoop,
    Shutdown,
}

/// Runs rounds on one background thread, either in a countdown loop or on
/// demand, never two at once.
///
/// Control methods return immediately; the round itself and every observer
/// callback happen on the worker thread.
pub struct SingleFlightScheduler {
    state: Arc<ScheduleState>,
    observer: Arc<dyn Observer>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl SingleFlightScheduler {
    pub fn spawn<R: RoundRunner>(
        runner: R,
        cadence: Cadence,
        observer: Arc<dyn Observer>,
    ) -> Result<Self> {
        let state = Arc::new(ScheduleState::default());
        let (commands, receiver) = mpsc::channel();
        let name = format!("krobot-{}", runner.name());
        let worker = Worker {
            runner,
            cadence,
            state: Arc::clone(&state),
            observer: Arc::clone(&observer),
        };
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run(receiver))
            .context("failed to spawn scheduler thread")?;
        Ok(Self {
            state,
            observer,
            commands,
            worker: Some(handle),
        })
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Arms the loop and runs the first round right away. Returns `false`
    /// when the loop was already armed.
    pub fn start_loop(&self) -> bool {
        if !self.state.arm() {
            self.observer.on_log(LogLevel::Info, "auto loop already running");
            return false;
        }
        self.observer.on_event("loop_started", payload(json!({})));
        if self.commands.send(Command::StartLoop).is_err() {
            self.state.disarm();
            return false;
        }
        true
    }

    /// Disarms the loop and cancels any pending countdown. A round already
    /// executing finishes.
    pub fn stop_loop(&self) {
        if self.state.disarm() {
            self.observer.on_event("loop_stopped", payload(json!({})));
        }
        let _ = self.commands.send(Command::StopLoop);
    }

    /// Runs one round outside the loop. Skipped, and `false` returned, when
    /// another round is executing or already claimed.
    pub fn run_once(&self, input: Option<String>) -> bool {
        if !self.state.try_claim() {
            self.observer.on_log(LogLevel::Warn, SKIP_MESSAGE);
            self.observer.on_event(
                "round_skipped",
                payload(json!({"trigger": RoundTrigger::AdHoc.as_str()})),
            );
            return false;
        }
        if self.commands.send(Command::RunOnce(input)).is_err() {
            self.state.release();
            return false;
        }
        true
    }

    /// Stops the loop and waits for the worker to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        self.state.disarm();
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SingleFlightScheduler {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

struct Countdown {
    remaining: u64,
    next_tick: Instant,
}

struct Worker<R> {
    runner: R,
    cadence: Cadence,
    state: Arc<ScheduleState>,
    observer: Arc<dyn Observer>,
}

impl<R: RoundRunner> Worker<R> {
    fn run(mut self, commands: Receiver<Command>) {
        let mut countdown: Option<Countdown> = None;
        loop {
            let received = match countdown.as_ref() {
                None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Some(pending) => {
                    let wait = pending.next_tick.saturating_duration_since(Instant::now());
                    commands.recv_timeout(wait)
                }
            };
            match received {
                Ok(Command::StartLoop) => {
                    countdown = self.loop_round();
                }
                Ok(Command::RunOnce(input)) => {
                    self.execute(RoundTrigger::AdHoc, input);
                }
                Ok(Command::StopLoop) => {
                    countdown = None;
                    self.state.set_remaining(0);
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    countdown = countdown.and_then(|pending| self.tick(pending));
                }
            }
        }
        self.state.set_remaining(0);
    }

    fn tick(&mut self, mut pending: Countdown) -> Option<Countdown> {
        if !self.state.is_running() {
            self.state.set_remaining(0);
            return None;
        }
        pending.remaining = pending.remaining.saturating_sub(1);
        self.state.set_remaining(pending.remaining);
        self.observer.on_countdown(pending.remaining);
        if pending.remaining > 0 {
            pending.next_tick += self.cadence.tick;
            return Some(pending);
        }
        self.loop_round()
    }

    /// Runs a loop round if the single-flight slot is free, then schedules
    /// the next one while the loop stays armed.
    fn loop_round(&mut self) -> Option<Countdown> {
        if !self.state.is_running() {
            return None;
        }
        if self.state.try_claim() {
            self.execute(RoundTrigger::Loop, None);
        } else {
            self.observer.on_log(LogLevel::Warn, SKIP_MESSAGE);
            self.observer.on_event(
                "round_skipped",
                payload(json!({"trigger": RoundTrigger::Loop.as_str()})),
            );
        }
        if !self.state.is_running() {
            return None;
        }
        let seconds = next_interval(
            self.cadence.max_seconds,
            self.cadence.randomize,
            &mut rand::rng(),
        );
        self.state.set_remaining(seconds);
        self.observer.on_countdown(seconds);
        Some(Countdown {
            remaining: seconds,
            next_tick: Instant::now() + self.cadence.tick,
        })
    }

    /// Executes one round under an already-claimed slot and releases it.
    fn execute(&mut self, trigger: RoundTrigger, input: Option<String>) {
        let name = self.runner.name().to_string();
        self.observer.on_event(
            "round_started",
            payload(json!({"runner": name, "trigger": trigger.as_str()})),
        );
        let started = Instant::now();
        let outcome = {
            let ctx = RoundContext::new(trigger, input, &self.state, self.observer.as_ref());
            let runner = &mut self.runner;
            // A panicking round must not take the worker down with it.
            panic::catch_unwind(AssertUnwindSafe(|| runner.run_round(&ctx)))
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(())) => {
                self.observer.on_event(
                    "round_finished",
                    payload(json!({
                        "runner": name,
                        "trigger": trigger.as_str(),
                        "elapsed_ms": elapsed_ms,
                    })),
                );
            }
            Ok(Err(err)) => self.report_failure(&name, trigger, &error_chain_text(&err, 1024)),
            Err(_) => self.report_failure(&name, trigger, "round panicked"),
        }
        self.observer.on_round_finished();
        self.state.release();
    }

    fn report_failure(&self, name: &str, trigger: RoundTrigger, reason: &str) {
        self.observer
            .on_log(LogLevel::Error, &format!("{name} round failed: {reason}"));
        self.observer.on_event(
            "round_failed",
            payload(json!({"runner": name, "trigger": trigger.as_str(), "error": reason})),
        );
    }
}
