use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use krobot_contracts::chat::{
    ChatMessage, ChatRequest, ConversationState, QuestionBank, DEFAULT_QUESTION,
};
use krobot_contracts::events::payload;
use krobot_contracts::ids::random_chat_id;
use krobot_contracts::runs::stats::StatsStore;
use krobot_contracts::settings::Settings;
use krobot_contracts::stream::EMPTY_ANSWER_PLACEHOLDER;
use serde_json::json;

use crate::client::ChatBackend;
use crate::observer::{LogLevel, Observer};
use crate::scheduler::{RoundContext, RoundRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundAnswer {
    pub chat_id: String,
    pub question: String,
    /// Cleaned answer, or the empty-answer placeholder.
    pub answer: String,
    pub thinking: String,
}

/// Asks the knowledge service one question per round.
///
/// With `conversation_rounds == 0` every round gets a fresh chat id and a
/// single-message history. Otherwise rounds share a chat id and the growing
/// message list until that many exchanges completed, then start over.
pub struct AutoChatRunner {
    backend: Arc<dyn ChatBackend>,
    refs: Vec<i64>,
    agent_link: BTreeMap<String, String>,
    questions: QuestionBank,
    categories: Vec<String>,
    conversation_rounds: u32,
    conversation: Option<ConversationState>,
    stats: Option<StatsStore>,
}

impl AutoChatRunner {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: &Settings, questions: QuestionBank) -> Self {
        Self {
            backend,
            refs: settings.refs.clone(),
            agent_link: settings.agent_link.clone(),
            questions,
            categories: settings.categories.clone(),
            conversation_rounds: settings.conversation_rounds,
            conversation: None,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: StatsStore) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn conversation(&self) -> Option<&ConversationState> {
        self.conversation.as_ref()
    }

    /// `None` draws from the question bank; blank input falls back to the
    /// default question.
    pub fn pick_question(&self, input: Option<&str>) -> String {
        match input {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            Some(_) => DEFAULT_QUESTION.to_string(),
            None => self
                .questions
                .random_question(&self.categories, &mut rand::rng()),
        }
    }

    /// Builds the request for `question`, rotating the conversation first
    /// when it reached its target length.
    pub fn build_request(&mut self, question: &str) -> ChatRequest {
        let (chat_id, mut messages) = if self.conversation_rounds == 0 {
            (random_chat_id(), Vec::new())
        } else {
            let rounds = self.conversation_rounds;
            let conversation = self
                .conversation
                .get_or_insert_with(|| ConversationState::new(rounds));
            if conversation.should_reset() {
                conversation.reset(rounds);
            }
            (
                conversation.chat_id().to_string(),
                conversation.messages().to_vec(),
            )
        };
        messages.push(ChatMessage::user(question));
        ChatRequest::streaming(chat_id, messages)
            .with_refs(self.refs.clone())
            .with_agent_link(self.agent_link.clone())
    }

    pub fn ask(&mut self, input: Option<&str>, observer: &dyn Observer) -> Result<RoundAnswer> {
        let question = self.pick_question(input);
        let request = self.build_request(&question);
        observer.on_log(LogLevel::Info, &format!("我: {question}"));

        let outcome = self.backend.stream_chat(&request, observer)?;
        let answer = if outcome.answer.is_empty() {
            EMPTY_ANSWER_PLACEHOLDER.to_string()
        } else {
            outcome.answer
        };
        observer.on_answer(&answer);

        if let Some(conversation) = self.conversation.as_mut() {
            conversation.record_exchange(&question, &answer);
        }
        let completed_rounds = match self.stats.as_ref().map(StatsStore::increment) {
            Some(Ok(count)) => Some(count),
            Some(Err(err)) => {
                observer.on_log(
                    LogLevel::Warn,
                    &format!("failed updating round stats: {err:#}"),
                );
                None
            }
            None => None,
        };
        observer.on_event(
            "chat_answered",
            payload(json!({
                "chat_id": request.chat_id,
                "question": question,
                "answer_chars": answer.chars().count(),
                "lines": outcome.lines.len(),
                "saw_done": outcome.saw_done,
                "completed_rounds": completed_rounds,
            })),
        );

        Ok(RoundAnswer {
            chat_id: request.chat_id,
            question,
            answer,
            thinking: outcome.thinking,
        })
    }
}

impl RoundRunner for AutoChatRunner {
    fn name(&self) -> &str {
        "chat"
    }

    fn run_round(&mut self, ctx: &RoundContext<'_>) -> Result<()> {
        self.ask(ctx.input.as_deref(), ctx.observer).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use anyhow::{bail, Result};
    use krobot_contracts::chat::{ChatRequest, QuestionBank, QuestionCategory};
    use krobot_contracts::runs::stats::StatsStore;
    use krobot_contracts::settings::Settings;
    use krobot_contracts::stream::EMPTY_ANSWER_PLACEHOLDER;
    use pretty_assertions::assert_eq;

    use super::AutoChatRunner;
    use crate::client::{ChatBackend, ChatOutcome, UploadResponse};
    use crate::observer::{NullObserver, Observer};

    #[derive(Default)]
    struct ScriptedBackend {
        answers: Mutex<Vec<String>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn with_answers(answers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().rev().map(|a| a.to_string()).collect()),
                requests: Mutex::default(),
            })
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn stream_chat(&self, request: &ChatRequest, _observer: &dyn Observer) -> Result<ChatOutcome> {
            self.requests.lock().unwrap().push(request.clone());
            let Some(answer) = self.answers.lock().unwrap().pop() else {
                bail!("no scripted answer left");
            };
            Ok(ChatOutcome {
                status: 200,
                answer,
                saw_done: true,
                ..ChatOutcome::default()
            })
        }

        fn upload_file(&self, _path: &Path, _app_id: &str, _chat_id: &str) -> Result<UploadResponse> {
            bail!("uploads are not scripted")
        }
    }

    fn bank() -> QuestionBank {
        QuestionBank {
            categories: vec![QuestionCategory {
                name: "报销".to_string(),
                questions: vec!["差旅报销流程是什么？".to_string()],
            }],
        }
    }

    #[test]
    fn single_round_mode_uses_fresh_ids() -> Result<()> {
        let backend = ScriptedBackend::with_answers(&["一。", "二。"]);
        let mut runner = AutoChatRunner::new(backend.clone(), &Settings::default(), bank());

        let first = runner.ask(Some("问题一"), &NullObserver)?;
        let second = runner.ask(None, &NullObserver)?;

        assert_ne!(first.chat_id, second.chat_id);
        assert_eq!(second.question, "差旅报销流程是什么？");
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].refs, vec![23, 24, 35]);
        assert_eq!(requests[1].messages.len(), 1);
        Ok(())
    }

    #[test]
    fn conversation_mode_carries_history_then_resets() -> Result<()> {
        let backend = ScriptedBackend::with_answers(&["a1", "a2", "a3"]);
        let settings = Settings {
            conversation_rounds: 2,
            ..Settings::default()
        };
        let mut runner = AutoChatRunner::new(backend.clone(), &settings, bank());

        let first = runner.ask(Some("q1"), &NullObserver)?;
        let second = runner.ask(Some("q2"), &NullObserver)?;
        let third = runner.ask(Some("q3"), &NullObserver)?;

        assert_eq!(first.chat_id, second.chat_id);
        assert_ne!(second.chat_id, third.chat_id);
        let requests = backend.requests.lock().unwrap();
        let roles: Vec<&str> = requests[1].messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(requests[2].messages.len(), 1);
        Ok(())
    }

    #[test]
    fn empty_answer_gets_placeholder_and_blank_input_default_question() -> Result<()> {
        let backend = ScriptedBackend::with_answers(&[""]);
        let mut runner = AutoChatRunner::new(backend, &Settings::default(), bank());

        let round = runner.ask(Some("   "), &NullObserver)?;

        assert_eq!(round.answer, EMPTY_ANSWER_PLACEHOLDER);
        assert_eq!(round.question, krobot_contracts::chat::DEFAULT_QUESTION);
        Ok(())
    }

    #[test]
    fn completed_rounds_are_counted_only_on_success() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let stats = StatsStore::new(temp.path().join("stats.json"));
        let backend = ScriptedBackend::with_answers(&["ok"]);
        let mut runner =
            AutoChatRunner::new(backend, &Settings::default(), bank()).with_stats(stats.clone());

        runner.ask(Some("q"), &NullObserver)?;
        assert!(runner.ask(Some("q"), &NullObserver).is_err());

        assert_eq!(stats.completed_rounds(), 1);
        Ok(())
    }
}
