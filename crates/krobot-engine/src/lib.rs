pub mod auto_chat;
pub mod client;
pub mod inspection;
pub mod observer;
pub mod round;
pub mod scheduler;

pub use auto_chat::{AutoChatRunner, RoundAnswer};
pub use client::{ChatBackend, ChatClient, ChatOutcome, UploadResponse};
pub use inspection::{
    archive_file, list_images, CycleSummary, InspectionCycle, InspectionError, InspectionTask,
    ARCHIVE_DIR_NAME, IMAGE_EXTENSIONS,
};
pub use observer::{LogLevel, LogObserver, NullObserver, Observer};
pub use round::{consume_stream, MarkerMode, StreamOutcome};
pub use scheduler::{
    next_interval, Cadence, RoundContext, RoundRunner, RoundTrigger, ScheduleState,
    SingleFlightScheduler,
};

/// Flattens an error chain into one line, dropping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{error_chain_text, truncate_text};

    #[test]
    fn error_chain_text_joins_distinct_causes() {
        let err = Err::<(), _>(std::io::Error::other("connection reset"))
            .context("chat stream interrupted")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "chat stream interrupted | caused by: connection reset"
        );
    }

    #[test]
    fn truncate_text_counts_chars_not_bytes() {
        assert_eq!(truncate_text("你好世界", 2), "你好…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
