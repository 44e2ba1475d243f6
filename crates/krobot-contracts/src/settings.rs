use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::chat::{agent_link_from_value, parse_agent_link};

pub const STATE_DIR_NAME: &str = ".krobot";
pub const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_CHAT_URL: &str =
    "http://127.0.0.1:8898/whaleagent/knowledgeService/api/v1/chat/completions";
const DEFAULT_UPLOAD_URL: &str =
    "http://127.0.0.1:8898/whaleagent/knowledgeService/core/chat/upload-files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalSettings {
    pub max_seconds: u64,
    pub randomize: bool,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            max_seconds: 60,
            randomize: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub connect_seconds: u64,
    /// Ceiling for a whole exchange, streamed body included.
    pub total_seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_seconds: 30,
            total_seconds: 180,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionSettings {
    pub folder: PathBuf,
    pub interval_seconds: u64,
    pub prompt: String,
    pub archive_failed: bool,
}

impl Default for InspectionSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("inspection"),
            interval_seconds: 30,
            prompt: "智能点检".to_string(),
            archive_failed: true,
        }
    }
}

/// Runtime configuration. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chat_url: String,
    pub upload_url: String,
    pub token: String,
    pub refs: Vec<i64>,
    /// Object or JSON text; anything else loads as empty.
    #[serde(deserialize_with = "deserialize_agent_link")]
    pub agent_link: BTreeMap<String, String>,
    pub interval: IntervalSettings,
    /// Rounds sharing one chat id and history; 0 gives every round its own id.
    pub conversation_rounds: u32,
    pub think_boundary_safe: bool,
    pub timeouts: TimeoutSettings,
    pub inspection: InspectionSettings,
    pub questions_path: Option<PathBuf>,
    pub categories: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chat_url: DEFAULT_CHAT_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            token: String::new(),
            refs: vec![23, 24, 35],
            agent_link: BTreeMap::new(),
            interval: IntervalSettings::default(),
            conversation_rounds: 0,
            think_boundary_safe: false,
            timeouts: TimeoutSettings::default(),
            inspection: InspectionSettings::default(),
            questions_path: None,
            categories: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads defaults, then the config file (explicit path, or
    /// `~/.krobot/config.json` when present), then `KROBOT_*` environment
    /// overrides. A malformed file is an error; a missing one is not.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut settings = match path {
            Some(path) if path.exists() => Self::read_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env_with(non_empty_env);
        Ok(settings)
    }

    pub fn read_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("KROBOT_CHAT_URL") {
            self.chat_url = value;
        }
        if let Some(value) = lookup("KROBOT_UPLOAD_URL") {
            self.upload_url = value;
        }
        if let Some(value) = lookup("KROBOT_TOKEN") {
            self.token = value;
        }
        if let Some(value) = lookup("KROBOT_AGENT_LINK") {
            self.agent_link = parse_agent_link(&value);
        }
    }

    /// `Authorization` header value. Tokens already carrying the `Bearer`
    /// scheme are sent verbatim.
    pub fn authorization(&self) -> Option<String> {
        let token = self.token.trim();
        if token.is_empty() {
            return None;
        }
        let has_scheme = token
            .get(..7)
            .map(|scheme| scheme.eq_ignore_ascii_case("bearer "))
            .unwrap_or(false);
        if has_scheme {
            Some(token.to_string())
        } else {
            Some(format!("Bearer {token}"))
        }
    }
}

/// `~/.krobot`, home of the default config, stats and event log.
pub fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STATE_DIR_NAME))
}

pub fn default_config_path() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

fn deserialize_agent_link<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(agent_link_from_value)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
