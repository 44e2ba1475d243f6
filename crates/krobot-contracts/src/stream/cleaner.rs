use super::think::{THINK_CLOSE, THINK_OPEN};

const SENTENCE_TERMINALS: &[char] = &['。', '！', '？', '!', '?', '\n'];

/// Placeholder shown when a round produced no usable answer text.
pub const EMPTY_ANSWER_PLACEHOLDER: &str = "(返回为空或无法解析)";

/// Finalises an accumulated answer.
///
/// Leftover `<think>…</think>` spans and stray markers are dropped, horizontal
/// whitespace runs become one space, line-break runs become one newline, and
/// the text is split into sentence units on `。！？!?` or newlines. Exact
/// duplicate units are removed keeping the first occurrence; survivors are
/// joined with newlines. The result may be empty.
pub fn clean_answer(text: &str) -> String {
    let stripped = strip_think_spans(text);
    let normalized = normalize_whitespace(&stripped);

    let mut units: Vec<String> = Vec::new();
    for unit in sentence_units(normalized.trim()) {
        if !units.contains(&unit) {
            units.push(unit);
        }
    }
    units.join("\n")
}

fn strip_think_spans(text: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(open_rel) = lower[cursor..].find(THINK_OPEN) {
        let open = cursor + open_rel;
        let body_start = open + THINK_OPEN.len();
        let Some(close_rel) = lower[body_start..].find(THINK_CLOSE) else {
            break;
        };
        out.push_str(&text[cursor..open]);
        cursor = body_start + close_rel + THINK_CLOSE.len();
    }
    out.push_str(&text[cursor..]);

    // Removing one marker can splice its neighbours into another.
    while has_marker(&out) {
        out = remove_marker(&remove_marker(&out, THINK_CLOSE), THINK_OPEN);
    }
    out
}

fn has_marker(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains(THINK_OPEN) || lower.contains(THINK_CLOSE)
}

fn remove_marker(text: &str, marker: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(rel) = lower[cursor..].find(marker) {
        out.push_str(&text[cursor..cursor + rel]);
        cursor += rel + marker.len();
    }
    out.push_str(&text[cursor..]);
    out
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            ' ' | '\t' => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            '\r' | '\n' => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Splits into units of non-terminal text followed by any terminal run.
/// Terminals with no preceding body are dropped, including runs that only
/// follow whitespace.
fn sentence_units(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();
    let mut in_tail = false;
    for ch in text.chars() {
        if SENTENCE_TERMINALS.contains(&ch) {
            if current.is_empty() {
                continue;
            }
            current.push(ch);
            in_tail = true;
        } else {
            if in_tail {
                units.push(std::mem::take(&mut current));
                in_tail = false;
            }
            current.push(ch);
        }
    }
    if !current.is_empty() {
        units.push(current);
    }
    units
        .into_iter()
        .map(|unit| unit.trim().to_string())
        .filter(|unit| !unit.chars().all(|ch| SENTENCE_TERMINALS.contains(&ch)))
        .collect()
}
