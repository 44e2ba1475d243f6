use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use krobot_contracts::chat::{ChatMessage, ChatRequest};
use krobot_contracts::events::payload;
use krobot_contracts::ids::{random_app_id, random_chat_id, resolve_response_id};
use krobot_contracts::runs::history::{HistoryEntry, HistoryLog};
use krobot_contracts::settings::InspectionSettings;
use krobot_contracts::stream::EMPTY_ANSWER_PLACEHOLDER;
use serde_json::json;
use thiserror::Error;

use crate::client::ChatBackend;
use crate::observer::LogLevel;
use crate::scheduler::{RoundContext, RoundRunner};
use crate::{error_chain_text, truncate_text};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];
pub const ARCHIVE_DIR_NAME: &str = "his";

const LOG_BODY_CHARS: usize = 500;

/// Why one inspection file failed. The variant names the stage that broke.
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("no reference id in upload response: {0}")]
    IdUnresolved(String),
    #[error("inspection call failed: {0}")]
    Invoke(String),
    #[error("archiving failed: {0}")]
    Archive(String),
}

impl InspectionError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Upload(_) => "upload",
            Self::IdUnresolved(_) => "resolve_id",
            Self::Invoke(_) => "invoke",
            Self::Archive(_) => "archive",
        }
    }
}

/// Per-file identifiers, generated fresh for every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionTask {
    pub path: PathBuf,
    pub app_id: String,
    pub chat_id: String,
    pub reference_id: Option<i64>,
}

impl InspectionTask {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            app_id: random_app_id(),
            chat_id: random_chat_id(),
            reference_id: None,
        }
    }

    pub fn file_name(&self) -> String {
        display_name(&self.path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub found: usize,
    pub completed: usize,
    pub failed: usize,
}

/// One scan of the inspection folder: every image found is uploaded,
/// inspected and moved into `his/`.
pub struct InspectionCycle {
    backend: Arc<dyn ChatBackend>,
    folder: PathBuf,
    prompt: String,
    archive_failed: bool,
}

impl InspectionCycle {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: &InspectionSettings) -> Self {
        Self {
            backend,
            folder: settings.folder.clone(),
            prompt: settings.prompt.clone(),
            archive_failed: settings.archive_failed,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.folder.join(ARCHIVE_DIR_NAME)
    }

    pub fn history(&self) -> HistoryLog {
        HistoryLog::in_dir(&self.archive_dir())
    }

    pub fn scan(&self, ctx: &RoundContext<'_>) -> Result<CycleSummary> {
        self.ensure_dirs(ctx)?;
        let images = list_images(&self.folder)?;
        let mut summary = CycleSummary {
            found: images.len(),
            ..CycleSummary::default()
        };
        ctx.observer.on_event(
            "scan_started",
            payload(json!({
                "folder": self.folder.to_string_lossy(),
                "found": images.len(),
            })),
        );
        if images.is_empty() {
            ctx.log(LogLevel::Info, "no images to inspect, waiting for next scan");
            return Ok(summary);
        }
        ctx.log(
            LogLevel::Info,
            &format!("found {} image(s) to inspect", images.len()),
        );

        for path in images {
            if !ctx.keep_going() {
                ctx.log(LogLevel::Info, "inspection stopped, leaving remaining files");
                break;
            }
            if self.process_file(&path, ctx) {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }
        }

        ctx.observer.on_event(
            "scan_finished",
            payload(json!({
                "found": summary.found,
                "completed": summary.completed,
                "failed": summary.failed,
            })),
        );
        Ok(summary)
    }

    fn ensure_dirs(&self, ctx: &RoundContext<'_>) -> Result<()> {
        if !self.folder.is_dir() {
            ctx.log(
                LogLevel::Info,
                &format!("creating inspection folder {}", self.folder.display()),
            );
        }
        let archive = self.archive_dir();
        fs::create_dir_all(&archive)
            .with_context(|| format!("failed to create {}", archive.display()))
    }

    /// Handles one file end to end. Failures are logged and recorded; they
    /// never abort the scan.
    fn process_file(&self, path: &Path, ctx: &RoundContext<'_>) -> bool {
        let mut task = InspectionTask::new(path);
        let file_name = task.file_name();
        ctx.log(
            LogLevel::Info,
            &format!(
                "inspecting {file_name} (appId={}, chatId={})",
                task.app_id, task.chat_id
            ),
        );

        let entry = match self.inspect(&mut task, ctx) {
            Ok(answer) => match self.archive(path) {
                Ok(archived_as) => {
                    ctx.log(LogLevel::Info, &format!("inspected {file_name}: {answer}"));
                    ctx.observer.on_event(
                        "file_processed",
                        payload(json!({
                            "file_name": file_name,
                            "reference_id": task.reference_id,
                            "archived_as": archived_as,
                        })),
                    );
                    HistoryEntry::completed(&file_name, Some(answer))
                        .with_archived_as(Some(archived_as))
                }
                Err(err) => self.record_failure(&task, &err, None, ctx),
            },
            Err(err) => {
                let archived_as = if self.archive_failed {
                    match self.archive(path) {
                        Ok(name) => Some(name),
                        Err(archive_err) => {
                            ctx.log(LogLevel::Warn, &archive_err.to_string());
                            None
                        }
                    }
                } else {
                    None
                };
                self.record_failure(&task, &err, archived_as, ctx)
            }
        };

        let succeeded = entry.stage.is_none();
        if let Err(err) = self.history().append(&entry) {
            ctx.log(
                LogLevel::Warn,
                &format!("failed writing history for {file_name}: {err:#}"),
            );
        }
        succeeded
    }

    fn inspect(
        &self,
        task: &mut InspectionTask,
        ctx: &RoundContext<'_>,
    ) -> Result<String, InspectionError> {
        let upload = self
            .backend
            .upload_file(&task.path, &task.app_id, &task.chat_id)
            .map_err(|err| InspectionError::Upload(error_chain_text(&err, LOG_BODY_CHARS)))?;
        ctx.log(
            LogLevel::Info,
            &format!(
                "upload {} -> {}: {}",
                task.file_name(),
                upload.status,
                truncate_text(&upload.body, LOG_BODY_CHARS)
            ),
        );

        let reference_id = resolve_response_id(&upload.body).ok_or_else(|| {
            InspectionError::IdUnresolved(truncate_text(&upload.body, LOG_BODY_CHARS))
        })?;
        task.reference_id = Some(reference_id);

        let request = ChatRequest::streaming(
            task.chat_id.clone(),
            vec![ChatMessage::user(self.prompt.clone())],
        )
        .with_refs(vec![reference_id]);
        let outcome = self
            .backend
            .stream_chat(&request, ctx.observer)
            .map_err(|err| InspectionError::Invoke(error_chain_text(&err, LOG_BODY_CHARS)))?;
        ctx.log(
            LogLevel::Info,
            &format!(
                "inspection call for {} -> {}: {}",
                task.file_name(),
                outcome.status,
                truncate_text(&outcome.raw_body(), LOG_BODY_CHARS)
            ),
        );
        if outcome.answer.is_empty() {
            return Ok(EMPTY_ANSWER_PLACEHOLDER.to_string());
        }
        Ok(outcome.answer)
    }

    fn archive(&self, path: &Path) -> Result<String, InspectionError> {
        archive_file(path, &self.archive_dir(), Local::now())
            .map(|target| display_name(&target))
            .map_err(|err| InspectionError::Archive(format!("{err:#}")))
    }

    fn record_failure(
        &self,
        task: &InspectionTask,
        err: &InspectionError,
        archived_as: Option<String>,
        ctx: &RoundContext<'_>,
    ) -> HistoryEntry {
        let file_name = task.file_name();
        ctx.log(LogLevel::Error, &format!("{file_name}: {err}"));
        ctx.observer.on_event(
            "file_failed",
            payload(json!({
                "file_name": file_name,
                "stage": err.stage(),
                "error": err.to_string(),
                "reference_id": task.reference_id,
            })),
        );
        HistoryEntry::failed(&file_name, err.stage(), err.to_string())
            .with_archived_as(archived_as)
    }
}

impl RoundRunner for InspectionCycle {
    fn name(&self) -> &str {
        "inspection"
    }

    fn run_round(&mut self, ctx: &RoundContext<'_>) -> Result<()> {
        self.scan(ctx).map(|_| ())
    }
}

/// Regular files directly inside `folder` with an image extension (matched
/// case-insensitively), sorted by path. Unreadable entries are skipped.
pub fn list_images(folder: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(folder).with_context(|| format!("failed listing {}", folder.display()))?;
    Ok(image_paths(entries.map(|entry| entry.map(|entry| entry.path()))))
}

fn image_paths(entries: impl IntoIterator<Item = io::Result<PathBuf>>) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    images.sort();
    images
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Moves `path` into `archive_dir` as `yyyyMMdd_HHmmss_<name>`. When that
/// name is taken, `_1`, `_2`, ... is appended to the stem until it is free.
pub fn archive_file(path: &Path, archive_dir: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(archive_dir)
        .with_context(|| format!("failed to create {}", archive_dir.display()))?;
    let name = display_name(path);
    let stamp = now.format("%Y%m%d_%H%M%S");
    let (stem, extension) = split_extension(&name);

    let mut target = archive_dir.join(format!("{stamp}_{name}"));
    let mut counter = 1u32;
    while target.exists() {
        target = archive_dir.join(format!("{stamp}_{stem}_{counter}{extension}"));
        counter += 1;
    }

    if fs::rename(path, &target).is_err() {
        // rename fails across filesystems
        fs::copy(path, &target).with_context(|| {
            format!("failed to copy {} to {}", path.display(), target.display())
        })?;
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(target)
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};
    use pretty_assertions::assert_eq;

    use super::{archive_file, image_paths, list_images, split_extension, InspectionError};

    #[test]
    fn lists_only_images_sorted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.Jpeg", "d.gif", "e.bmp", "noext"] {
            std::fs::write(temp.path().join(name), b"x")?;
        }
        std::fs::create_dir(temp.path().join("his.png"))?;

        let names: Vec<String> = list_images(temp.path())?
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG", "c.Jpeg", "d.gif", "e.bmp"]);
        Ok(())
    }

    #[test]
    fn unreadable_entry_does_not_hide_other_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let first = temp.path().join("b.png");
        let second = temp.path().join("a.png");
        std::fs::write(&first, b"x")?;
        std::fs::write(&second, b"x")?;

        let images = image_paths(vec![
            Ok(first.clone()),
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")),
            Ok(second.clone()),
        ]);
        assert_eq!(images, vec![second, first]);
        Ok(())
    }

    #[test]
    fn archive_names_are_prefixed_and_collision_free() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let archive = temp.path().join("his");
        let now = Local
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("unambiguous local time");

        let mut archived = Vec::new();
        for _ in 0..3 {
            let source = temp.path().join("x.png");
            std::fs::write(&source, b"img")?;
            let target = archive_file(&source, &archive, now)?;
            assert!(!source.exists());
            archived.push(target.file_name().unwrap().to_string_lossy().to_string());
        }

        assert_eq!(
            archived,
            vec![
                "20260304_050607_x.png",
                "20260304_050607_x_1.png",
                "20260304_050607_x_2.png",
            ]
        );
        Ok(())
    }

    #[test]
    fn split_extension_handles_dotfiles_and_plain_names() {
        assert_eq!(split_extension("a.tar.png"), ("a.tar", ".png"));
        assert_eq!(split_extension("plain"), ("plain", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }

    #[test]
    fn error_stage_names() {
        assert_eq!(InspectionError::Upload("x".into()).stage(), "upload");
        assert_eq!(InspectionError::IdUnresolved("x".into()).stage(), "resolve_id");
        assert_eq!(InspectionError::Invoke("x".into()).stage(), "invoke");
        assert_eq!(InspectionError::Archive("x".into()).stage(), "archive");
    }
}
