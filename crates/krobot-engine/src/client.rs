use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use krobot_contracts::chat::ChatRequest;
use krobot_contracts::settings::Settings;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};

use crate::observer::Observer;
use crate::round::{consume_stream, MarkerMode, StreamOutcome};
use crate::truncate_text;

const ERROR_BODY_CHARS: usize = 512;

/// Result of one streamed chat call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatOutcome {
    pub status: u16,
    /// Raw stream lines in arrival order.
    pub lines: Vec<String>,
    /// Cleaned answer; empty when the stream carried no usable text.
    pub answer: String,
    pub thinking: String,
    pub saw_done: bool,
}

impl ChatOutcome {
    pub fn from_stream(status: u16, stream: StreamOutcome) -> Self {
        Self {
            status,
            lines: stream.lines,
            answer: stream.answer,
            thinking: stream.thinking,
            saw_done: stream.saw_done,
        }
    }

    /// Raw body text as received, one line per stream line, or
    /// `status: <code>` when nothing arrived.
    pub fn raw_body(&self) -> String {
        if self.lines.is_empty() {
            return format!("status: {}", self.status);
        }
        self.lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: String,
}

/// The two remote calls the robot makes. [`ChatClient`] talks HTTP; tests
/// substitute in-memory fakes.
pub trait ChatBackend: Send + Sync {
    /// Posts `request` and consumes the streamed reply, forwarding raw
    /// lines and thinking text to `observer` as they arrive.
    fn stream_chat(&self, request: &ChatRequest, observer: &dyn Observer) -> Result<ChatOutcome>;

    /// Uploads one file as multipart form data (`files`, `appId`,
    /// `chatId`).
    fn upload_file(&self, path: &Path, app_id: &str, chat_id: &str) -> Result<UploadResponse>;
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: HttpClient,
    chat_url: String,
    upload_url: String,
    authorization: Option<String>,
    total_timeout: Duration,
    marker_mode: MarkerMode,
}

impl ChatClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let timeouts = &settings.timeouts;
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_seconds.max(1)))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            chat_url: settings.chat_url.clone(),
            upload_url: settings.upload_url.clone(),
            authorization: settings.authorization(),
            total_timeout: Duration::from_secs(timeouts.total_seconds.max(1)),
            marker_mode: MarkerMode::from_flag(settings.think_boundary_safe),
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.authorization.as_deref() {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }
}

impl ChatBackend for ChatClient {
    fn stream_chat(&self, request: &ChatRequest, observer: &dyn Observer) -> Result<ChatOutcome> {
        let builder = self
            .http
            .post(&self.chat_url)
            .timeout(self.total_timeout)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        let response = self
            .authorize(builder)
            .send()
            .with_context(|| format!("chat request failed ({})", self.chat_url))?;
        let status = response.status().as_u16();
        let response = ensure_success("chat", response)?;

        let stream = consume_stream(BufReader::new(response), self.marker_mode, observer);
        if let Some(err) = stream.transport_error.as_deref() {
            bail!(
                "chat stream interrupted after {} lines: {err}",
                stream.lines.len()
            );
        }
        Ok(ChatOutcome::from_stream(status, stream))
    }

    fn upload_file(&self, path: &Path, app_id: &str, chat_id: &str) -> Result<UploadResponse> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let part = MultipartPart::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .context("invalid upload mime type")?;
        let form = MultipartForm::new()
            .part("files", part)
            .text("appId", app_id.to_string())
            .text("chatId", chat_id.to_string());

        let builder = self
            .http
            .post(&self.upload_url)
            .timeout(self.total_timeout)
            .multipart(form);
        let response = self
            .authorize(builder)
            .send()
            .with_context(|| format!("upload request failed ({})", self.upload_url))?;
        let status = response.status().as_u16();
        let body = response_text_or_error("upload", response)?;
        Ok(UploadResponse { status, body })
    }
}

fn ensure_success(label: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    bail!(
        "{label} request failed ({}): {}",
        status.as_u16(),
        truncate_text(&body, ERROR_BODY_CHARS)
    );
}

fn response_text_or_error(label: &str, response: Response) -> Result<String> {
    ensure_success(label, response)?
        .text()
        .with_context(|| format!("failed reading {label} response body"))
}
