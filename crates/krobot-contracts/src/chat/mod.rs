mod console;
mod conversation;
mod questions;
mod request;

pub use console::{parse_console_command, ConsoleCommand, CONSOLE_HELP_COMMANDS};
pub use conversation::ConversationState;
pub use questions::{QuestionBank, QuestionCategory, DEFAULT_QUESTION};
pub use request::{agent_link_from_value, parse_agent_link, ChatMessage, ChatRequest};
