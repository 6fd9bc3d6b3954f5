pub mod chunker;
pub mod continuation;
pub mod dispatch;
pub mod engine;
mod error;
pub mod fix;
pub mod merge;
pub mod parse;
pub mod prompt;
pub mod service;
pub mod summarize;
pub mod tokenizer;
pub mod validate;

use std::sync::Arc;

use stratum_core::AiSettings;

pub use dispatch::{Accumulator, ChunkFailure, DispatchConfig, Dispatcher, Prompt};
pub use engine::LlmEngine;
pub use error::{CompletionError, DispatchError, TokenizerError, ValidationError};
pub use fix::{FixOutcome, FixRound, Fixer};
pub use service::{CompletionService, MockCompletion, Role, ScriptedCompletion, Turn};
pub use summarize::Summarizer;
pub use tokenizer::{HfTokenizer, SegmentTokenizer, Tokenizer};
pub use validate::{RetryPolicy, ValidationOutcome, Validator};

/// The configured completion service, or `None` when the mock should answer.
pub fn service_from_settings(settings: &AiSettings) -> Option<Arc<dyn CompletionService>> {
    if settings.pipeline.mock {
        log::info!("mock completion forced by settings");
        return None;
    }
    if !stratum_core::ai_configured(settings) {
        log::warn!("no AI provider configured, falling back to mock completion");
        return None;
    }
    match LlmEngine::new(settings.clone()) {
        Ok(engine) => {
            log::info!("using {} ({})", settings.provider, settings.model);
            Some(Arc::new(engine))
        }
        Err(e) => {
            log::warn!("{e}, falling back to mock completion");
            None
        }
    }
}

/// A `tokenizer.json` tokenizer when one is configured and loads, word
/// segmentation otherwise.
pub fn tokenizer_from_settings(settings: &AiSettings) -> Arc<dyn Tokenizer> {
    if let Some(path) = &settings.pipeline.tokenizer_path {
        match HfTokenizer::from_file(path) {
            Ok(tokenizer) => return Arc::new(tokenizer),
            Err(e) => log::warn!("{e}, counting word segments instead"),
        }
    }
    Arc::new(SegmentTokenizer::new())
}

/// Dispatcher wired from settings: service, tokenizer and pipeline bounds.
pub fn dispatcher_from_settings(settings: &AiSettings) -> Dispatcher {
    Dispatcher::new(
        service_from_settings(settings),
        tokenizer_from_settings(settings),
        DispatchConfig::from_settings(&settings.pipeline),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_settings_use_the_mock() {
        let dispatcher = dispatcher_from_settings(&AiSettings::default());
        assert!(dispatcher.uses_mock());
    }

    #[test]
    fn unknown_provider_falls_back_to_the_mock() {
        let settings = AiSettings {
            provider: "carrier-pigeon".into(),
            api_key: "k".into(),
            model: "m".into(),
            ..Default::default()
        };
        assert!(service_from_settings(&settings).is_none());
    }

    #[test]
    fn missing_tokenizer_file_falls_back_to_segments() {
        let mut settings = AiSettings::default();
        settings.pipeline.tokenizer_path = Some("/nonexistent/tokenizer.json".into());
        let tokenizer = tokenizer_from_settings(&settings);
        assert_eq!(tokenizer.count("two words").unwrap(), 3);
    }
}
