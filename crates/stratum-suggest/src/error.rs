use stratum_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Tokenizer load failed: {0}")]
    Load(String),

    #[error("Unknown token id {0}")]
    UnknownToken(u32),

    #[error("Tokenizer failed: {0}")]
    Backend(String),
}

/// Failure of a single call to the completion service. Never retried at this level.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("build LLM: {0}")]
    Build(String),

    #[error("chat: {0}")]
    Transport(String),

    #[error("LLM returned empty text")]
    EmptyText,

    #[error("LLM returned no text")]
    NoText,

    #[error("no scripted reply left")]
    ScriptExhausted,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("nothing to send: prompt has no turns")]
    EmptyPrompt,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("could not parse completion: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("no module summaries to validate")]
    NoModules,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
