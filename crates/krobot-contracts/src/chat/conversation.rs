use super::request::ChatMessage;

/// Multi-round conversation bookkeeping.
///
/// A conversation keeps one chat id and its message history for
/// `target_rounds` completed rounds, then starts over with a fresh id.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    chat_id: String,
    messages: Vec<ChatMessage>,
    completed_rounds: u32,
    target_rounds: u32,
}

impl ConversationState {
    pub fn new(target_rounds: u32) -> Self {
        let mut state = Self::default();
        state.reset(target_rounds);
        state
    }

    pub fn reset(&mut self, target_rounds: u32) {
        self.chat_id = uuid::Uuid::new_v4().simple().to_string();
        self.messages.clear();
        self.completed_rounds = 0;
        self.target_rounds = target_rounds;
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn completed_rounds(&self) -> u32 {
        self.completed_rounds
    }

    pub fn should_reset(&self) -> bool {
        self.completed_rounds >= self.target_rounds
    }

    /// Records a finished exchange and advances the round counter.
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
        self.completed_rounds += 1;
    }
}
