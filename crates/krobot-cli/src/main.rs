use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use krobot_contracts::chat::{
    parse_console_command, ConsoleCommand, QuestionBank, CONSOLE_HELP_COMMANDS,
};
use krobot_contracts::events::{EventPayload, EventWriter};
use krobot_contracts::runs::history::{parse_filter_date, HistoryLog, HistoryStatus};
use krobot_contracts::runs::stats::StatsStore;
use krobot_contracts::settings::{state_dir, Settings};
use krobot_engine::{
    AutoChatRunner, Cadence, ChatBackend, ChatClient, InspectionCycle, LogLevel, LogObserver,
    Observer, RoundContext, RoundTrigger, ScheduleState, SingleFlightScheduler,
    ARCHIVE_DIR_NAME,
};
use tracing_subscriber::EnvFilter;

const EVENTS_FILE_NAME: &str = "events.jsonl";
const STATS_FILE_NAME: &str = "stats.json";
const QUESTIONS_FILE_NAME: &str = "questions.json";

#[derive(Debug, Parser)]
#[command(
    name = "krobot",
    version,
    about = "Knowledge robot: scheduled chat rounds and folder inspection"
)]
struct Cli {
    /// Config file (default `~/.krobot/config.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Event log (default `~/.krobot/events.jsonl`).
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask questions on a countdown loop.
    Chat(ChatArgs),
    /// Ask a single question and print the answer.
    Ask(AskArgs),
    /// Watch a folder and inspect every image dropped into it.
    Inspect(InspectArgs),
    /// List archived inspection records.
    History(HistoryArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    max_interval: Option<u64>,
    #[arg(long)]
    random: bool,
    /// Rounds per conversation; 0 starts a new chat every round.
    #[arg(long)]
    rounds: Option<u32>,
    /// Restrict random questions to these categories.
    #[arg(long = "category")]
    categories: Vec<String>,
    /// Do not start the loop until `/start`.
    #[arg(long)]
    paused: bool,
}

#[derive(Debug, Parser)]
struct AskArgs {
    question: Vec<String>,
}

#[derive(Debug, Parser)]
struct InspectArgs {
    #[arg(long)]
    folder: Option<PathBuf>,
    #[arg(long)]
    interval: Option<u64>,
    /// Scan once and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long)]
    folder: Option<PathBuf>,
    /// First day to include, `yyyy-MM-dd`.
    #[arg(long)]
    from: Option<String>,
    /// Last day to include, `yyyy-MM-dd`.
    #[arg(long)]
    to: Option<String>,
    #[arg(long)]
    json: bool,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("krobot error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let observer = Arc::new(ConsoleObserver::new(event_writer(cli.events)));
    match cli.command {
        Command::Chat(args) => run_chat(settings, args, observer),
        Command::Ask(args) => run_ask(settings, args, observer),
        Command::Inspect(args) => run_inspect(settings, args, observer),
        Command::History(args) => run_history(settings, args),
    }
}

fn run_chat(
    mut settings: Settings,
    args: ChatArgs,
    observer: Arc<ConsoleObserver>,
) -> Result<i32> {
    if let Some(max) = args.max_interval {
        settings.interval.max_seconds = max;
    }
    if args.random {
        settings.interval.randomize = true;
    }
    if let Some(rounds) = args.rounds {
        settings.conversation_rounds = rounds;
    }
    if !args.categories.is_empty() {
        settings.categories = args.categories;
    }

    let runner = chat_runner(&settings)?;
    let cadence = Cadence::new(settings.interval.max_seconds, settings.interval.randomize);
    let scheduler = SingleFlightScheduler::spawn(runner, cadence, observer.clone())?;
    tracing::info!(
        chat_url = %settings.chat_url,
        max_seconds = settings.interval.max_seconds,
        randomize = settings.interval.randomize,
        "chat loop ready"
    );
    println!("krobot chat started. Type /help for commands.");
    if !args.paused {
        scheduler.start_loop();
    }
    console_loop(&scheduler)?;
    scheduler.shutdown();
    Ok(0)
}

fn run_ask(settings: Settings, args: AskArgs, observer: Arc<ConsoleObserver>) -> Result<i32> {
    let mut runner = chat_runner(&settings)?;
    let question = args.question.join(" ");
    let round = runner.ask(Some(question.as_str()), observer.as_ref())?;
    observer.close_thinking();
    tracing::debug!(chat_id = %round.chat_id, "ask finished");
    Ok(0)
}

fn run_inspect(
    mut settings: Settings,
    args: InspectArgs,
    observer: Arc<ConsoleObserver>,
) -> Result<i32> {
    if let Some(folder) = args.folder {
        settings.inspection.folder = folder;
    }
    if let Some(interval) = args.interval {
        settings.inspection.interval_seconds = interval;
    }
    let backend: Arc<dyn ChatBackend> = Arc::new(ChatClient::new(&settings)?);
    let cycle = InspectionCycle::new(backend, &settings.inspection);

    if args.once {
        let state = ScheduleState::default();
        let ctx = RoundContext::new(RoundTrigger::AdHoc, None, &state, observer.as_ref());
        let summary = cycle.scan(&ctx)?;
        println!(
            "found {}, completed {}, failed {}",
            summary.found, summary.completed, summary.failed
        );
        return Ok(if summary.failed > 0 { 2 } else { 0 });
    }

    println!(
        "krobot inspection watching {} every {}s. Type /help for commands.",
        cycle.folder().display(),
        settings.inspection.interval_seconds.max(1)
    );
    let cadence = Cadence::new(settings.inspection.interval_seconds, false);
    let scheduler = SingleFlightScheduler::spawn(cycle, cadence, observer.clone())?;
    scheduler.start_loop();
    console_loop(&scheduler)?;
    scheduler.shutdown();
    Ok(0)
}

fn run_history(settings: Settings, args: HistoryArgs) -> Result<i32> {
    let folder = args.folder.unwrap_or(settings.inspection.folder);
    let log = HistoryLog::in_dir(&folder.join(ARCHIVE_DIR_NAME));
    let from = parse_filter_date(args.from.as_deref().unwrap_or_default())?;
    let to = parse_filter_date(args.to.as_deref().unwrap_or_default())?;
    let entries = log.read_range(from, to)?;
    if entries.is_empty() {
        println!("no history records in {}", log.path().display());
        return Ok(0);
    }
    for entry in entries {
        if args.json {
            println!("{}", serde_json::to_string(&entry)?);
            continue;
        }
        let status = match entry.status {
            HistoryStatus::Completed => "completed".to_string(),
            HistoryStatus::Failed => format!("failed@{}", entry.stage.as_deref().unwrap_or("?")),
        };
        println!(
            "{}  {:<20} {}  {}",
            entry.ts,
            status,
            entry.file_name,
            entry.detail.as_deref().unwrap_or_default()
        );
    }
    Ok(0)
}

fn chat_runner(settings: &Settings) -> Result<AutoChatRunner> {
    let backend: Arc<dyn ChatBackend> = Arc::new(ChatClient::new(settings)?);
    let questions_path = settings
        .questions_path
        .clone()
        .or_else(|| state_dir().map(|dir| dir.join(QUESTIONS_FILE_NAME)));
    let questions = match questions_path {
        Some(path) => QuestionBank::load(&path)?,
        None => QuestionBank::default(),
    };
    let known = questions.category_names();
    for category in settings.categories.iter().filter(|name| !known.contains(name)) {
        tracing::warn!(%category, "category not in question bank, ignored");
    }
    let runner = AutoChatRunner::new(backend, settings, questions);
    Ok(match state_dir() {
        Some(dir) => runner.with_stats(StatsStore::new(dir.join(STATS_FILE_NAME))),
        None => runner,
    })
}

fn event_writer(path: Option<PathBuf>) -> Option<EventWriter> {
    let path = path.or_else(|| state_dir().map(|dir| dir.join(EVENTS_FILE_NAME)))?;
    let session_id = Local::now().format("%Y%m%dT%H%M%S").to_string();
    let writer = EventWriter::new(path, session_id);
    tracing::debug!(path = %writer.path().display(), "event log");
    Some(writer)
}

fn console_loop(scheduler: &SingleFlightScheduler) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        match parse_console_command(&line) {
            ConsoleCommand::Noop => {}
            ConsoleCommand::Help => println!("Commands: {}", CONSOLE_HELP_COMMANDS.join(" ")),
            ConsoleCommand::Start => {
                scheduler.start_loop();
            }
            ConsoleCommand::Stop => {
                scheduler.stop_loop();
                println!("loop stopped");
            }
            ConsoleCommand::Status => {
                let state = scheduler.state();
                println!(
                    "running={} processing={} next_in={}s",
                    state.is_running(),
                    state.is_processing(),
                    state.remaining_seconds()
                );
            }
            ConsoleCommand::Ask(input) => {
                scheduler.run_once(input);
            }
            ConsoleCommand::Quit => break,
            ConsoleCommand::Unknown(text) => println!("Unknown command: {text} (try /help)"),
        }
    }
    Ok(())
}

/// Prints thinking live and answers as they land; everything else goes to
/// the log observer.
struct ConsoleObserver {
    log: LogObserver,
    thinking_open: AtomicBool,
}

impl ConsoleObserver {
    fn new(events: Option<EventWriter>) -> Self {
        Self {
            log: LogObserver::new(events),
            thinking_open: AtomicBool::new(false),
        }
    }

    fn close_thinking(&self) {
        if self.thinking_open.swap(false, Ordering::SeqCst) {
            println!();
        }
    }
}

impl Observer for ConsoleObserver {
    fn on_raw_line(&self, line: &str) {
        self.log.on_raw_line(line);
    }

    fn on_thinking(&self, text: &str) {
        let mut out = io::stdout().lock();
        if !self.thinking_open.swap(true, Ordering::SeqCst) {
            let _ = write!(out, "思考: ");
        }
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    fn on_answer(&self, answer: &str) {
        self.close_thinking();
        println!("助手: {answer}");
    }

    fn on_countdown(&self, remaining_seconds: u64) {
        self.log.on_countdown(remaining_seconds);
    }

    fn on_round_finished(&self) {
        self.close_thinking();
    }

    fn on_log(&self, level: LogLevel, message: &str) {
        self.close_thinking();
        self.log.on_log(level, message);
    }

    fn on_event(&self, event_type: &str, payload: EventPayload) {
        self.log.on_event(event_type, payload);
    }
}
