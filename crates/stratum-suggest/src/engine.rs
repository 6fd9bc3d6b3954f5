use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;

use stratum_core::AiSettings;

use crate::error::CompletionError;
use crate::service::{CompletionService, Role, Turn};

fn map_backend(provider: &str) -> Result<LLMBackend, CompletionError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(CompletionError::UnknownProvider(other.to_string())),
    }
}

/// Completion service backed by the `llm` crate, configured from [`AiSettings`].
#[derive(Debug, Clone)]
pub struct LlmEngine {
    settings: AiSettings,
}

impl LlmEngine {
    pub fn new(settings: AiSettings) -> Result<Self, CompletionError> {
        map_backend(&settings.provider)?;
        Ok(Self { settings })
    }
}

#[async_trait]
impl CompletionService for LlmEngine {
    async fn complete(&self, turns: &[Turn]) -> Result<String, CompletionError> {
        let backend = map_backend(&self.settings.provider)?;

        let system: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
            .collect();

        let mut builder = LLMBuilder::new().backend(backend).model(&self.settings.model);
        if !system.is_empty() {
            builder = builder.system(system.join("\n\n"));
        }
        if !self.settings.api_key.is_empty() {
            builder = builder.api_key(&self.settings.api_key);
        }

        let llm = builder
            .build()
            .map_err(|e| CompletionError::Build(e.to_string()))?;

        let messages: Vec<ChatMessage> = turns
            .iter()
            .filter_map(|t| match t.role {
                Role::System => None,
                Role::User => Some(ChatMessage::user().content(&t.content).build()),
                Role::Assistant => Some(ChatMessage::assistant().content(&t.content).build()),
            })
            .collect();

        log::debug!(
            "sending {} messages to {} ({})",
            messages.len(),
            self.settings.provider,
            self.settings.model
        );
        let response = llm
            .chat(&messages)
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        match response.text() {
            Some(text) if !text.trim().is_empty() => Ok(text),
            Some(_) => Err(CompletionError::EmptyText),
            None => Err(CompletionError::NoText),
        }
    }

    fn model_id(&self) -> &str {
        &self.settings.model
    }
}
