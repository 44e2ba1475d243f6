/// One line typed at the interactive `chat` / `inspect` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Noop,
    Help,
    Start,
    Stop,
    Status,
    /// Ad-hoc round: a question for chat, a scan for inspection. Plain text
    /// without a leading slash is an ask with that text.
    Ask(Option<String>),
    Quit,
    Unknown(String),
}

pub const CONSOLE_HELP_COMMANDS: &[&str] =
    &["/start", "/stop", "/ask", "/scan", "/status", "/help", "/quit"];

pub fn parse_console_command(text: &str) -> ConsoleCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ConsoleCommand::Noop;
    }
    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return ConsoleCommand::Ask(Some(trimmed.to_string()));
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();
    match command.as_str() {
        "help" => ConsoleCommand::Help,
        "start" => ConsoleCommand::Start,
        "stop" => ConsoleCommand::Stop,
        "status" => ConsoleCommand::Status,
        "ask" | "scan" | "once" => ConsoleCommand::Ask(if arg.is_empty() {
            None
        } else {
            Some(arg.to_string())
        }),
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Unknown(trimmed.to_string()),
    }
}
