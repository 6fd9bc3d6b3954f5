use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CompletionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A language model behind an ordered list of role/content turns.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, turns: &[Turn]) -> Result<String, CompletionError>;

    fn model_id(&self) -> &str;
}

// --- Mock ---

/// Deterministic offline stand-in for a real model.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCompletion;

impl MockCompletion {
    pub fn respond(&self, turns: &[Turn]) -> String {
        let wants_json = turns
            .iter()
            .any(|t| t.content.contains("JSON") || t.content.contains("json"));
        if wants_json {
            json!({
                "functional_coverage": {
                    "conclusion": "❓",
                    "explanation": "mock review: no completion service is configured"
                },
                "missing_or_redundant_modules": {"missing": [], "redundant": []},
                "overlapping_responsibilities": [],
                "undefined_dependencies": [],
                "layer_violations": [],
                "api_format_issues": [],
                "test_coverage_issues": [],
                "suggestions": ["Configure an AI provider in ~/.stratum/settings.json for a real review"]
            })
            .to_string()
        } else {
            "Mock response: no completion service is configured, so this text stands in for a model answer."
                .to_string()
        }
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, turns: &[Turn]) -> Result<String, CompletionError> {
        Ok(self.respond(turns))
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

// --- Scripted replay ---

/// Replays canned replies in order and records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()))
    }

    fn push(self, reply: Result<String, String>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map_or(0, |r| r.len())
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, turns: &[Turn]) -> Result<String, CompletionError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(turns.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| CompletionError::Transport("script lock poisoned".to_string()))?
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(CompletionError::Transport(message)),
            None => Err(CompletionError::ScriptExhausted),
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mock_answers_json_prompts_with_a_review() {
        let text = MockCompletion.respond(&[Turn::user("Answer in JSON please")]);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("functional_coverage").is_some());

        let plain = MockCompletion.respond(&[Turn::user("hello")]);
        assert!(plain.starts_with("Mock response"));
    }

    #[tokio::test]
    async fn scripted_replays_in_order_then_runs_dry() {
        let service = ScriptedCompletion::new().reply("first").fail("boom");
        assert_eq!(service.complete(&[Turn::user("a")]).await.unwrap(), "first");
        assert!(matches!(
            service.complete(&[Turn::user("b")]).await,
            Err(CompletionError::Transport(m)) if m == "boom"
        ));
        assert!(matches!(
            service.complete(&[Turn::user("c")]).await,
            Err(CompletionError::ScriptExhausted)
        ));
        assert_eq!(service.requests().len(), 3);
        assert_eq!(service.requests()[1], vec![Turn::user("b")]);
    }
}
