use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate, SecondsFormat};
use serde::{Deserialize, Serialize};

pub const HISTORY_FILE_NAME: &str = "history.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Completed,
    Failed,
}

/// Archival record of one processed inspection file. Never rewritten once
/// appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// RFC 3339 timestamp carrying the local offset at recording time.
    pub ts: String,
    pub file_name: String,
    pub status: HistoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_as: Option<String>,
}

impl HistoryEntry {
    pub fn completed(file_name: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            ts: now_local_iso(),
            file_name: file_name.into(),
            status: HistoryStatus::Completed,
            stage: None,
            detail,
            archived_as: None,
        }
    }

    pub fn failed(file_name: impl Into<String>, stage: &str, detail: impl Into<String>) -> Self {
        Self {
            ts: now_local_iso(),
            file_name: file_name.into(),
            status: HistoryStatus::Failed,
            stage: Some(stage.to_string()),
            detail: Some(detail.into()),
            archived_as: None,
        }
    }

    pub fn with_archived_as(mut self, archived_as: Option<String>) -> Self {
        self.archived_as = archived_as;
        self
    }

    /// Calendar date of the record in the offset it was written with.
    pub fn date(&self) -> Option<NaiveDate> {
        DateTime::parse_from_rfc3339(&self.ts)
            .ok()
            .map(|ts| ts.date_naive())
    }
}

/// JSONL history file kept next to archived inspection files.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HISTORY_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &HistoryEntry) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed opening {}", self.path.display()))?;
        file.write_all(serde_json::to_string(entry)?.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// All readable records in append order. Malformed lines are skipped and
    /// a missing file reads as empty.
    pub fn read_all(&self) -> anyhow::Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<HistoryEntry>(line).ok())
            .collect())
    }

    /// Records whose date falls within the inclusive `[from, to]` range.
    /// Either bound may be open.
    pub fn read_range(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> anyhow::Result<Vec<HistoryEntry>> {
        Ok(filter_by_date(self.read_all()?, from, to))
    }
}

pub fn filter_by_date(
    entries: Vec<HistoryEntry>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<HistoryEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            let Some(date) = entry.date() else {
                return from.is_none() && to.is_none();
            };
            from.map(|from| date >= from).unwrap_or(true) && to.map(|to| date <= to).unwrap_or(true)
        })
        .collect()
}

/// Parses a `yyyy-MM-dd` filter bound; blank input means no bound.
pub fn parse_filter_date(text: &str) -> anyhow::Result<Option<NaiveDate>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(Some)
        .with_context(|| format!("invalid date {trimmed:?}, expected yyyy-MM-dd"))
}

fn now_local_iso() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry_at(ts: &str, name: &str) -> HistoryEntry {
        HistoryEntry {
            ts: ts.to_string(),
            ..HistoryEntry::completed(name, None)
        }
    }

    #[test]
    fn append_and_read_back_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = HistoryLog::in_dir(&temp.path().join("his"));

        log.append(&HistoryEntry::completed("a.png", Some("ok".to_string())))?;
        log.append(&HistoryEntry::failed("b.jpg", "upload", "HTTP 500"))?;

        let entries = log.read_all()?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name, "a.png");
        assert_eq!(entries[0].status, HistoryStatus::Completed);
        assert_eq!(entries[1].status, HistoryStatus::Failed);
        assert_eq!(entries[1].stage.as_deref(), Some("upload"));
        assert!(entries[1].date().is_some());
        Ok(())
    }

    #[test]
    fn malformed_lines_are_skipped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = HistoryLog::in_dir(temp.path());
        log.append(&HistoryEntry::completed("a.png", None))?;
        let mut raw = std::fs::read_to_string(log.path())?;
        raw.push_str("{not json\n\n");
        std::fs::write(log.path(), raw)?;
        log.append(&HistoryEntry::completed("b.png", None))?;

        let names: Vec<String> = log.read_all()?.into_iter().map(|e| e.file_name).collect();
        assert_eq!(names, vec!["a.png".to_string(), "b.png".to_string()]);
        Ok(())
    }

    #[test]
    fn date_filter_is_inclusive() -> anyhow::Result<()> {
        let entries = vec![
            entry_at("2026-03-01T09:00:00+08:00", "early.png"),
            entry_at("2026-03-02T23:59:59+08:00", "mid.png"),
            entry_at("2026-03-05T00:00:00+08:00", "late.png"),
        ];
        let from = parse_filter_date("2026-03-02")?;
        let to = parse_filter_date("2026-03-05")?;
        let names: Vec<String> = filter_by_date(entries.clone(), from, to)
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["mid.png".to_string(), "late.png".to_string()]);

        let open = filter_by_date(entries, None, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(open.len(), 1);
        Ok(())
    }

    #[test]
    fn filter_date_parsing() {
        assert_eq!(parse_filter_date("  ").ok(), Some(None));
        assert!(parse_filter_date("2026/03/01").is_err());
    }
}
