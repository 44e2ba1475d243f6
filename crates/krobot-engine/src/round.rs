use std::io::BufRead;

use krobot_contracts::stream::{
    clean_answer, extract_delta, SplitFragment, StreamLineReader, ThinkSplitter,
};

use crate::observer::Observer;

/// How think markers that straddle two fragments are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkerMode {
    /// Each fragment is scanned alone; a marker split across fragments is
    /// not recognized.
    #[default]
    PerFragment,
    /// A trailing partial marker is held back and joined with the next
    /// fragment.
    BoundarySafe,
}

impl MarkerMode {
    pub fn from_flag(boundary_safe: bool) -> Self {
        if boundary_safe {
            Self::BoundarySafe
        } else {
            Self::PerFragment
        }
    }

    fn splitter(self) -> ThinkSplitter {
        match self {
            Self::PerFragment => ThinkSplitter::new(),
            Self::BoundarySafe => ThinkSplitter::boundary_safe(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Every non-blank line, including the ones after `[DONE]`.
    pub lines: Vec<String>,
    /// Answer text as streamed, before cleaning.
    pub raw_answer: String,
    /// Cleaned answer. Empty when nothing usable arrived.
    pub answer: String,
    pub thinking: String,
    pub saw_done: bool,
    /// Set when the body broke off with an I/O error; lines read before the
    /// error are still in `lines`.
    pub transport_error: Option<String>,
}

/// Drives one streamed response body through line framing, delta
/// extraction and think splitting.
///
/// Thinking text reaches `observer` as it is parsed. Content after the
/// terminal `[DONE]` line is ignored, but the lines still go to
/// [`Observer::on_raw_line`].
pub fn consume_stream<R: BufRead>(
    reader: R,
    mode: MarkerMode,
    observer: &dyn Observer,
) -> StreamOutcome {
    let mut splitter = mode.splitter();
    let mut lines = StreamLineReader::new(reader);
    let mut outcome = StreamOutcome::default();

    for line in lines.by_ref() {
        observer.on_raw_line(&line.raw);
        outcome.lines.push(line.raw);
        if outcome.saw_done {
            continue;
        }
        if line.done {
            outcome.saw_done = true;
            continue;
        }
        let Some(fragment) = extract_delta(&line.payload) else {
            continue;
        };
        absorb(&mut outcome, splitter.push(&fragment), observer);
    }
    absorb(&mut outcome, splitter.finish(), observer);

    if let Some(err) = lines.take_error() {
        outcome.transport_error = Some(err.to_string());
    }
    outcome.answer = clean_answer(&outcome.raw_answer);
    outcome
}

fn absorb(outcome: &mut StreamOutcome, fragment: SplitFragment, observer: &dyn Observer) {
    if fragment.is_empty() {
        return;
    }
    outcome.raw_answer.push_str(&fragment.answer);
    let display = fragment.thinking_display();
    if !display.is_empty() {
        observer.on_thinking(&display);
    }
    outcome.thinking.push_str(&fragment.thinking_text());
}
