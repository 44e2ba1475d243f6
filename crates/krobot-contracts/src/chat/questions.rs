use std::path::Path;

use anyhow::Context;
use chrono::{Duration, Local};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUESTION: &str = "请给出与中国电信内部财务或流程有关的规范指引与办理要点。";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCategory {
    pub name: String,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Question categories loaded from a JSON file of the form
/// `{"categories": [{"name": "...", "questions": ["..."]}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBank {
    #[serde(default)]
    pub categories: Vec<QuestionCategory>,
}

impl QuestionBank {
    /// Reads a bank from disk. A missing file is an empty bank.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading question bank {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid question bank {}", path.display()))
    }

    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }

    /// Picks a question from one of `chosen` (or any category when empty).
    /// Falls back to [`DEFAULT_QUESTION`] when nothing usable exists.
    pub fn random_question<R: Rng + ?Sized>(&self, chosen: &[String], rng: &mut R) -> String {
        let pool: Vec<&QuestionCategory> = if chosen.is_empty() {
            self.categories.iter().collect()
        } else {
            self.categories
                .iter()
                .filter(|category| chosen.contains(&category.name))
                .collect()
        };
        let Some(category) = pool.choose(rng) else {
            return DEFAULT_QUESTION.to_string();
        };
        let Some(base) = category.questions.choose(rng) else {
            return format!("请提供{}的最新操作规范。", category.name);
        };
        if base.trim().is_empty() {
            return DEFAULT_QUESTION.to_string();
        }
        match dynamic_suffix(rng) {
            Some(suffix) => format!("{}{suffix}", base.trim()),
            None => base.trim().to_string(),
        }
    }
}

fn dynamic_suffix<R: Rng + ?Sized>(rng: &mut R) -> Option<String> {
    let today = Local::now().date_naive();
    match rng.random_range(0..4) {
        0 => {
            let day = today - Duration::days(rng.random_range(0..10));
            Some(format!("（请结合{}发布的通知说明）", day.format("%Y年%-m月%-d日")))
        }
        1 => {
            let day = today + Duration::days(rng.random_range(0..15));
            Some(format!(
                "。我们准备在{}前完成，请给出关键控制点。",
                day.format("%Y年%-m月%-d日")
            ))
        }
        2 => Some("，并说明与上一版制度相比的变化。".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{QuestionBank, QuestionCategory, DEFAULT_QUESTION};

    fn bank() -> QuestionBank {
        QuestionBank {
            categories: vec![
                QuestionCategory {
                    name: "财务流程".to_string(),
                    questions: vec!["报销需要哪些材料？".to_string()],
                },
                QuestionCategory {
                    name: "宽带报障".to_string(),
                    questions: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn empty_bank_falls_back_to_default_question() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            QuestionBank::default().random_question(&[], &mut rng),
            DEFAULT_QUESTION
        );
    }

    #[test]
    fn chosen_category_is_respected() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let question = bank().random_question(&["财务流程".to_string()], &mut rng);
            assert!(question.starts_with("报销需要哪些材料？"), "{question}");
        }
    }

    #[test]
    fn category_without_questions_asks_for_guidelines() {
        let mut rng = StdRng::seed_from_u64(5);
        let question = bank().random_question(&["宽带报障".to_string()], &mut rng);
        assert_eq!(question, "请提供宽带报障的最新操作规范。");
    }

    #[test]
    fn load_reads_json_and_tolerates_missing_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        assert_eq!(
            QuestionBank::load(&temp.path().join("missing.json"))?,
            QuestionBank::default()
        );

        let path = temp.path().join("questions.json");
        std::fs::write(
            &path,
            r#"{"categories":[{"name":"IT数据需求流程","questions":["怎么提需求？"]}]}"#,
        )?;
        let loaded = QuestionBank::load(&path)?;
        assert_eq!(loaded.category_names(), vec!["IT数据需求流程".to_string()]);
        Ok(())
    }
}
