pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
/// Full-width indent written to the thinking display when a block opens.
pub const THINK_LEAD_IN: &str = "\u{3000}\u{3000}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkState {
    #[default]
    Answering,
    Thinking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThinkPiece {
    BlockStart,
    Text(String),
}

/// Output of one [`ThinkSplitter::push`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitFragment {
    pub answer: String,
    pub thinking: Vec<ThinkPiece>,
}

impl SplitFragment {
    /// Thinking text without block markers.
    pub fn thinking_text(&self) -> String {
        self.thinking
            .iter()
            .filter_map(|piece| match piece {
                ThinkPiece::Text(text) => Some(text.as_str()),
                ThinkPiece::BlockStart => None,
            })
            .collect()
    }

    /// Thinking text as shown live, with [`THINK_LEAD_IN`] at each block start.
    pub fn thinking_display(&self) -> String {
        self.thinking
            .iter()
            .map(|piece| match piece {
                ThinkPiece::Text(text) => text.as_str(),
                ThinkPiece::BlockStart => THINK_LEAD_IN,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.answer.is_empty() && self.thinking.is_empty()
    }
}

/// Routes stream fragments into an answer channel and a thinking channel.
///
/// Fragments are scanned left to right and every `<think>` / `</think>`
/// occurrence flips the state once. By default each fragment is scanned on
/// its own, so a marker split across two fragments is not recognised and its
/// pieces land in whichever channel was active. [`ThinkSplitter::boundary_safe`]
/// instead holds back a trailing partial marker until the next fragment (or
/// [`ThinkSplitter::finish`]) decides it.
#[derive(Debug, Clone, Default)]
pub struct ThinkSplitter {
    state: ThinkState,
    boundary_safe: bool,
    pending: String,
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boundary_safe() -> Self {
        Self {
            boundary_safe: true,
            ..Self::default()
        }
    }

    pub fn state(&self) -> ThinkState {
        self.state
    }

    pub fn push(&mut self, fragment: &str) -> SplitFragment {
        let mut out = SplitFragment::default();
        let buffered = if self.boundary_safe {
            let mut joined = std::mem::take(&mut self.pending);
            joined.push_str(fragment);
            joined
        } else {
            fragment.to_string()
        };

        let mut remain = buffered.as_str();
        while !remain.is_empty() {
            let marker = match self.state {
                ThinkState::Answering => THINK_OPEN,
                ThinkState::Thinking => THINK_CLOSE,
            };
            if let Some(idx) = remain.find(marker) {
                self.route(&mut out, &remain[..idx]);
                remain = &remain[idx + marker.len()..];
                self.state = match self.state {
                    ThinkState::Answering => {
                        out.thinking.push(ThinkPiece::BlockStart);
                        ThinkState::Thinking
                    }
                    ThinkState::Thinking => ThinkState::Answering,
                };
                continue;
            }

            let keep = if self.boundary_safe {
                partial_marker_len(remain, marker)
            } else {
                0
            };
            let split = remain.len() - keep;
            self.route(&mut out, &remain[..split]);
            self.pending = remain[split..].to_string();
            break;
        }
        out
    }

    /// Flushes any held-back partial marker into the active channel.
    pub fn finish(&mut self) -> SplitFragment {
        let mut out = SplitFragment::default();
        let pending = std::mem::take(&mut self.pending);
        self.route(&mut out, &pending);
        out
    }

    fn route(&self, out: &mut SplitFragment, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.state {
            ThinkState::Answering => out.answer.push_str(text),
            ThinkState::Thinking => out.thinking.push(ThinkPiece::Text(text.to_string())),
        }
    }
}

fn partial_marker_len(text: &str, marker: &str) -> usize {
    let max = (marker.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|len| text.ends_with(&marker[..*len]))
        .unwrap_or(0)
}
