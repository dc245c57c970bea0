//! Seams to the language-model planner and to prompt history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::dag_flow::node::ServiceSelection;

/// The planner's verdict on whether a prompt can be acted on
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PromptAssessment {
    pub clear: bool,
    /// Refined query, meaningful when `clear`
    #[serde(default)]
    pub query: String,
    /// Explanation for the user, or notes for service selection
    #[serde(default)]
    pub feedback: String,
}

impl PromptAssessment {
    pub fn clear(query: impl Into<String>) -> Self {
        Self {
            clear: true,
            query: query.into(),
            feedback: String::new(),
        }
    }

    pub fn unclear(feedback: impl Into<String>) -> Self {
        Self {
            clear: false,
            query: String::new(),
            feedback: feedback.into(),
        }
    }
}

/// What the planner knows when selecting services
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanRequest {
    /// The prompt with hints removed
    pub original: String,
    pub refined: String,
    pub feedback: String,
    /// User hints written as `[[...]]` in the prompt
    pub hints: Vec<String>,
}

lazy_static! {
    static ref HINT: Regex = Regex::new(r"\[\[(.*?)\]\]").unwrap();
    static ref SPACES: Regex = Regex::new(r"[ \t]{2,}").unwrap();
}

/// Split `[[...]]` hints out of a prompt.
///
/// Returns the prompt without the hint markers and the trimmed, non-empty
/// hint texts in the order they appear.
pub fn extract_hints(prompt: &str) -> (String, Vec<String>) {
    let hints = HINT
        .captures_iter(prompt)
        .map(|caps| caps[1].trim().to_string())
        .filter(|hint| !hint.is_empty())
        .collect();
    let stripped = HINT.replace_all(prompt, "");
    let cleaned = SPACES.replace_all(stripped.trim(), " ").into_owned();
    (cleaned, hints)
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Decide whether `prompt` is actionable with the described services
    async fn assess_prompt(&self, prompt: &str, catalog: &str) -> anyhow::Result<PromptAssessment>;

    /// Fold earlier prompts into the current one
    async fn summarize_prompts(&self, prompt: &str, history: &str) -> anyhow::Result<String>;

    /// Choose the services that answer the request
    async fn select_services(
        &self,
        request: &PlanRequest,
        catalog: &str,
    ) -> anyhow::Result<Vec<ServiceSelection>>;
}

/// Source of the user's recent prompts
#[async_trait]
pub trait PromptHistory: Send + Sync {
    async fn record(&self, prompt: &str) -> anyhow::Result<()>;

    /// Up to `limit` most recent prompts recorded at or after `since`,
    /// oldest first
    async fn recent_prompts(
        &self,
        limit: usize,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>>;
}

/// Process-local prompt history
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    prompts: Mutex<Vec<(DateTime<Utc>, String)>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with prompts stamped now
    pub fn with_prompts<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            prompts: Mutex::new(prompts.into_iter().map(|p| (now, p.into())).collect()),
        }
    }

    pub async fn record_at(&self, prompt: impl Into<String>, at: DateTime<Utc>) {
        self.prompts.lock().await.push((at, prompt.into()));
    }
}

#[async_trait]
impl PromptHistory for InMemoryHistory {
    async fn record(&self, prompt: &str) -> anyhow::Result<()> {
        self.record_at(prompt, Utc::now()).await;
        Ok(())
    }

    async fn recent_prompts(
        &self,
        limit: usize,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        let prompts = self.prompts.lock().await;
        let recent: Vec<String> = prompts
            .iter()
            .filter(|(at, _)| *at >= since)
            .map(|(_, prompt)| prompt.clone())
            .collect();
        let start = recent.len().saturating_sub(limit);
        Ok(recent[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_assessment_parses_planner_json() {
        let raw = r#"{"Clear": false, "Feedback": "Which table?"}"#;
        let assessment: PromptAssessment = serde_json::from_str(raw).unwrap();
        assert_eq!(assessment, PromptAssessment::unclear("Which table?"));
    }

    #[tokio::test]
    async fn test_history_returns_latest_oldest_first() {
        let history = InMemoryHistory::with_prompts(["one", "two"]);
        history.record("three").await.unwrap();
        let since = Utc::now() - Duration::minutes(5);
        assert_eq!(history.recent_prompts(2, since).await.unwrap(), vec!["two", "three"]);
        assert_eq!(history.recent_prompts(10, since).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_history_ignores_prompts_outside_window() {
        let history = InMemoryHistory::new();
        history
            .record_at("stale", Utc::now() - Duration::minutes(30))
            .await;
        history.record("fresh").await.unwrap();

        let since = Utc::now() - Duration::minutes(5);
        assert_eq!(history.recent_prompts(5, since).await.unwrap(), vec!["fresh"]);
    }

    #[test]
    fn test_extract_hints() {
        let (prompt, hints) =
            extract_hints("Revenue by month [[use the sales schema]] for 2023 [[ fiscal year ]]");
        assert_eq!(prompt, "Revenue by month for 2023");
        assert_eq!(hints, vec!["use the sales schema", "fiscal year"]);

        let (prompt, hints) = extract_hints("plain question [[ ]]");
        assert_eq!(prompt, "plain question");
        assert!(hints.is_empty());
    }
}
