use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

const COMPLETED_ROUNDS_KEY: &str = "completed_rounds";

/// Persistent counter of completed chat rounds.
///
/// The on-disk file is re-read before every increment so that several
/// processes sharing the file do not lose each other's counts.
#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn completed_rounds(&self) -> u64 {
        read_json_object(&self.path)
            .and_then(|payload| payload.get(COMPLETED_ROUNDS_KEY).and_then(Value::as_u64))
            .unwrap_or(0)
    }

    pub fn increment(&self) -> anyhow::Result<u64> {
        let mut payload = read_json_object(&self.path).unwrap_or_default();
        let next = payload
            .get(COMPLETED_ROUNDS_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .saturating_add(1);
        payload.insert(COMPLETED_ROUNDS_KEY.to_string(), json!(next));
        write_json_object(&self.path, &payload)?;
        Ok(next)
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::StatsStore;

    #[test]
    fn missing_file_counts_zero() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let stats = StatsStore::new(temp.path().join("stats.json"));
        assert_eq!(stats.completed_rounds(), 0);
        Ok(())
    }

    #[test]
    fn increment_persists_between_instances() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("stats.json");
        let first = StatsStore::new(&path);
        let second = StatsStore::new(&path);

        assert_eq!(first.increment()?, 1);
        assert_eq!(second.increment()?, 2);
        assert_eq!(first.completed_rounds(), 2);
        Ok(())
    }

    #[test]
    fn unrelated_keys_survive_increment() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("stats.json");
        std::fs::write(&path, r#"{"note":"keep","completed_rounds":4}"#)?;

        let stats = StatsStore::new(&path);
        assert_eq!(stats.increment()?, 5);

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["note"], json!("keep"));
        Ok(())
    }

    #[test]
    fn corrupt_file_restarts_from_zero() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("stats.json");
        std::fs::write(&path, "not json")?;
        let stats = StatsStore::new(&path);
        assert_eq!(stats.completed_rounds(), 0);
        assert_eq!(stats.increment()?, 1);
        Ok(())
    }
}
