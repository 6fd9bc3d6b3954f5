use std::sync::Arc;

use stratum_core::PipelineSettings;

use crate::chunker;
use crate::continuation;
use crate::error::{CompletionError, DispatchError};
use crate::service::{CompletionService, MockCompletion, Role, Turn};
use crate::tokenizer::{estimate_tokens, Tokenizer};

/// What to send. Variants are listed in resolution priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// A full conversation history, sent as-is.
    Messages(Vec<Turn>),
    SystemUser { system: String, user: String },
    User(String),
}

impl Prompt {
    /// Pick the richest input given: history, then system + user, then user.
    pub fn resolve(
        messages: Option<Vec<Turn>>,
        system: Option<String>,
        user: Option<String>,
    ) -> Option<Prompt> {
        match (messages, system, user) {
            (Some(messages), _, _) if !messages.is_empty() => Some(Prompt::Messages(messages)),
            (_, Some(system), Some(user)) if !system.is_empty() && !user.is_empty() => {
                Some(Prompt::SystemUser { system, user })
            }
            (_, _, Some(user)) if !user.is_empty() => Some(Prompt::User(user)),
            _ => None,
        }
    }

    pub fn into_turns(self) -> Vec<Turn> {
        match self {
            Prompt::Messages(turns) => turns,
            Prompt::SystemUser { system, user } => vec![Turn::system(system), Turn::user(user)],
            Prompt::User(user) => vec![Turn::user(user)],
        }
    }
}

/// System prompt for chunk `part` of `total` (1-based).
pub type ChunkPromptFn<'a> = &'a (dyn Fn(usize, usize) -> String + Send + Sync);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub max_input_tokens: usize,
    pub max_chunks: usize,
    pub chars_per_token: usize,
    /// Calls per logical request; 1 disables continuation.
    pub continuation_steps: usize,
    pub mock: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

impl DispatchConfig {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_input_tokens: settings.max_input_tokens,
            max_chunks: settings.max_chunks,
            chars_per_token: settings.chars_per_token,
            continuation_steps: settings.continuation_steps,
            mock: settings.mock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// 1-based chunk index.
    pub chunk: usize,
    pub message: String,
}

/// Caller-owned result of a dispatch: created empty (or seeded), handed to
/// [`Dispatcher::dispatch`] and handed back with every chunk folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator<T> {
    value: Option<T>,
    pub merged: usize,
    pub failed: Vec<ChunkFailure>,
    pub dropped: usize,
}

impl<T> Default for Accumulator<T> {
    fn default() -> Self {
        Self {
            value: None,
            merged: 0,
            failed: Vec::new(),
            dropped: 0,
        }
    }
}

impl<T> Accumulator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(value: T) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// Seed with `next` when empty, otherwise fold it in with `merge`.
    pub fn absorb(&mut self, next: T, merge: impl Fn(T, T) -> T) {
        self.value = Some(match self.value.take() {
            None => next,
            Some(acc) => merge(acc, next),
        });
        self.merged += 1;
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// Sends prompts of any size to a completion service, chunking when needed.
pub struct Dispatcher {
    service: Option<Arc<dyn CompletionService>>,
    tokenizer: Arc<dyn Tokenizer>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Without a service every dispatch answers from [`MockCompletion`].
    pub fn new(
        service: Option<Arc<dyn CompletionService>>,
        tokenizer: Arc<dyn Tokenizer>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            service,
            tokenizer,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Same service and tokenizer, different bounds.
    pub fn with_config(&self, config: DispatchConfig) -> Dispatcher {
        Dispatcher {
            service: self.service.clone(),
            tokenizer: self.tokenizer.clone(),
            config,
        }
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn uses_mock(&self) -> bool {
        self.config.mock || self.service.is_none()
    }

    /// Token count of `text`, estimated from characters when the tokenizer fails.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count(text).unwrap_or_else(|e| {
            log::warn!("token count failed ({e}), estimating from characters");
            estimate_tokens(text, self.config.chars_per_token)
        })
    }

    /// Send `prompt` and fold the parsed answer(s) into `acc`.
    ///
    /// Input within `max_input_tokens` goes out as one request (with
    /// `chunk_prompt(1, 1)` as system prompt if it has none), and a failure
    /// there is returned as an error. Larger input is split into at most
    /// `max_chunks` chunks sent in order; a chunk whose call or parse fails
    /// is recorded in `acc.failed` and skipped.
    pub async fn dispatch<T, P, M>(
        &self,
        prompt: Prompt,
        parse: P,
        merge: M,
        chunk_prompt: Option<ChunkPromptFn<'_>>,
        mut acc: Accumulator<T>,
    ) -> Result<Accumulator<T>, DispatchError>
    where
        P: Fn(&str) -> Result<T, String>,
        M: Fn(T, T) -> T,
    {
        let turns = prompt.into_turns();
        if turns.is_empty() {
            return Err(DispatchError::EmptyPrompt);
        }

        let service = match &self.service {
            Some(service) if !self.config.mock => service.as_ref(),
            _ => {
                log::info!("using mock completion");
                let text = MockCompletion.respond(&with_system(turns, chunk_prompt));
                acc.absorb(parse(&text).map_err(DispatchError::Parse)?, &merge);
                return Ok(acc);
            }
        };

        let input: String = turns
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let token_count = self.count_tokens(&input);

        if token_count <= self.config.max_input_tokens {
            log::debug!("{token_count} tokens fit in one request");
            let text = self.complete(service, with_system(turns, chunk_prompt)).await?;
            acc.absorb(parse(&text).map_err(DispatchError::Parse)?, &merge);
            return Ok(acc);
        }

        let split = chunker::split_text(
            &input,
            self.tokenizer.as_ref(),
            self.config.max_input_tokens,
            self.config.chars_per_token,
        );
        let mut chunks = split.chunks;
        let max_chunks = self.config.max_chunks.max(1);
        if chunks.len() > max_chunks {
            log::warn!(
                "input split into {} chunks, dropping the last {}",
                chunks.len(),
                chunks.len() - max_chunks
            );
            acc.dropped += chunks.len() - max_chunks;
            chunks.truncate(max_chunks);
        }

        let base_system = turns
            .iter()
            .find(|t| t.role == Role::System)
            .map(|t| t.content.clone());
        let total = chunks.len();
        log::info!("{token_count} tokens over budget, sending {total} chunks");

        for (i, chunk) in chunks.into_iter().enumerate() {
            let part = i + 1;
            let system = chunk_prompt
                .map(|f| f(part, total))
                .or_else(|| base_system.clone())
                .filter(|s| !s.is_empty());
            let mut chunk_turns = Vec::with_capacity(2);
            if let Some(system) = system {
                chunk_turns.push(Turn::system(system));
            }
            chunk_turns.push(Turn::user(chunk));

            let outcome = match self.complete(service, chunk_turns).await {
                Ok(text) => parse(&text).map_err(DispatchError::Parse),
                Err(e) => Err(DispatchError::Completion(e)),
            };
            match outcome {
                Ok(value) => acc.absorb(value, &merge),
                Err(e) => {
                    log::warn!("chunk {part}/{total} failed, skipping: {e}");
                    acc.failed.push(ChunkFailure {
                        chunk: part,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(acc)
    }

    async fn complete(
        &self,
        service: &dyn CompletionService,
        turns: Vec<Turn>,
    ) -> Result<String, CompletionError> {
        if self.config.continuation_steps <= 1 {
            return service.complete(&turns).await;
        }
        let out =
            continuation::complete_with_continuation(service, turns, self.config.continuation_steps)
                .await;
        match (out.responses, out.stopped_by) {
            (0, Some(e)) => Err(e),
            (0, None) => Err(CompletionError::EmptyText),
            _ => Ok(out.text),
        }
    }
}

/// Prepend `chunk_prompt(1, 1)` to a single request that has no system turn.
fn with_system(mut turns: Vec<Turn>, chunk_prompt: Option<ChunkPromptFn<'_>>) -> Vec<Turn> {
    if let Some(f) = chunk_prompt {
        if !turns.iter().any(|t| t.role == Role::System) {
            turns.insert(0, Turn::system(f(1, 1)));
        }
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge;
    use crate::service::ScriptedCompletion;
    use crate::tokenizer::SegmentTokenizer;
    use pretty_assertions::assert_eq;

    fn dispatcher(service: Arc<ScriptedCompletion>, max_input_tokens: usize) -> Dispatcher {
        Dispatcher::new(
            Some(service),
            Arc::new(SegmentTokenizer::new()),
            DispatchConfig {
                max_input_tokens,
                max_chunks: 10,
                chars_per_token: 4,
                continuation_steps: 1,
                mock: false,
            },
        )
    }

    fn text(s: &str) -> Result<String, String> {
        Ok(s.to_string())
    }

    #[test]
    fn prompt_priority() {
        let history = vec![Turn::user("hi")];
        assert_eq!(
            Prompt::resolve(Some(history.clone()), Some("sys".into()), Some("u".into())),
            Some(Prompt::Messages(history))
        );
        assert_eq!(
            Prompt::resolve(None, Some("sys".into()), Some("u".into())),
            Some(Prompt::SystemUser {
                system: "sys".into(),
                user: "u".into()
            })
        );
        assert_eq!(
            Prompt::resolve(Some(vec![]), None, Some("u".into())),
            Some(Prompt::User("u".into()))
        );
        assert_eq!(Prompt::resolve(None, Some("sys".into()), None), None);
    }

    #[tokio::test]
    async fn small_input_is_one_request() {
        let service = Arc::new(ScriptedCompletion::new().reply("answer"));
        let acc = dispatcher(service.clone(), 100)
            .dispatch(
                Prompt::SystemUser {
                    system: "be brief".into(),
                    user: "question".into(),
                },
                text,
                merge::concat_text,
                None,
                Accumulator::new(),
            )
            .await
            .unwrap();
        assert_eq!(acc.value().map(String::as_str), Some("answer"));
        assert_eq!(service.requests().len(), 1);
        assert_eq!(service.requests()[0].len(), 2);
    }

    #[tokio::test]
    async fn single_request_takes_the_whole_document_prompt() {
        let service = Arc::new(ScriptedCompletion::new().reply("ok"));
        let part_prompt = |part: usize, total: usize| format!("part {part} of {total}");
        dispatcher(service.clone(), 100)
            .dispatch(
                Prompt::User("q".into()),
                text,
                merge::concat_text,
                Some(&part_prompt),
                Accumulator::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            service.requests()[0],
            vec![Turn::system("part 1 of 1"), Turn::user("q")]
        );
    }

    #[tokio::test]
    async fn chunked_dispatches_do_not_grow_the_shared_tokenizer() {
        let tokenizer = Arc::new(SegmentTokenizer::new());
        let service = Arc::new((0..40).fold(ScriptedCompletion::new(), |s, _| s.reply("ok")));
        let dispatcher = Dispatcher::new(
            Some(service.clone()),
            tokenizer.clone(),
            DispatchConfig {
                max_input_tokens: 5,
                max_chunks: 10,
                chars_per_token: 4,
                continuation_steps: 1,
                mock: false,
            },
        );
        for i in 0..10 {
            dispatcher
                .dispatch(
                    Prompt::User(format!("alpha{i} beta{i} gamma{i} delta{i}")),
                    text,
                    merge::concat_text,
                    None,
                    Accumulator::new(),
                )
                .await
                .unwrap();
        }
        assert_eq!(service.requests().len(), 20);
        assert_eq!(tokenizer.vocab_size(), 0);
    }

    #[tokio::test]
    async fn single_request_failure_propagates() {
        let service = Arc::new(ScriptedCompletion::new().fail("offline"));
        let result = dispatcher(service, 100)
            .dispatch(
                Prompt::User("question".into()),
                text,
                merge::concat_text,
                None,
                Accumulator::new(),
            )
            .await;
        assert!(matches!(result, Err(DispatchError::Completion(_))));
    }

    #[tokio::test]
    async fn chunks_go_out_in_order_with_part_prompts() {
        let service = Arc::new(ScriptedCompletion::new().reply("r1").reply("r2").reply("r3"));
        let part_prompt = |part: usize, total: usize| format!("part {part} of {total}");
        // "a b c d e" is 9 segments; a budget of 3 gives three chunks
        let acc = dispatcher(service.clone(), 3)
            .dispatch(
                Prompt::User("a b c d e".into()),
                text,
                merge::concat_text,
                Some(&part_prompt),
                Accumulator::new(),
            )
            .await
            .unwrap();

        assert_eq!(acc.value().map(String::as_str), Some("r1\nr2\nr3"));
        assert_eq!(acc.merged, 3);
        let requests = service.requests();
        let systems: Vec<&str> = requests.iter().map(|r| r[0].content.as_str()).collect();
        assert_eq!(systems, vec!["part 1 of 3", "part 2 of 3", "part 3 of 3"]);
        let users: String = requests.iter().map(|r| r[1].content.as_str()).collect();
        assert_eq!(users, "a b c d e");
    }

    #[tokio::test]
    async fn failed_chunks_are_skipped_and_recorded() {
        let service = Arc::new(
            ScriptedCompletion::new()
                .fail("boom")
                .reply("7")
                .reply("not a number"),
        );
        let acc = dispatcher(service, 3)
            .dispatch(
                Prompt::User("1 2 3 4 5".into()),
                |s: &str| s.trim().parse::<i64>().map_err(|e| e.to_string()),
                |a: i64, b: i64| a + b,
                None,
                Accumulator::new(),
            )
            .await
            .unwrap();
        let failed: Vec<usize> = acc.failed.iter().map(|f| f.chunk).collect();
        assert_eq!(failed, vec![1, 3]);
        assert_eq!(acc.merged, 1);
        assert_eq!(acc.into_value(), Some(7));
    }

    #[tokio::test]
    async fn every_chunk_failing_yields_no_result() {
        let service = Arc::new(ScriptedCompletion::new().fail("a").fail("b").fail("c"));
        let acc = dispatcher(service, 3)
            .dispatch(
                Prompt::User("a b c d e".into()),
                text,
                merge::concat_text,
                None,
                Accumulator::new(),
            )
            .await
            .unwrap();
        assert!(acc.is_empty());
        let failed: Vec<usize> = acc.failed.iter().map(|f| f.chunk).collect();
        assert_eq!(failed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn chunk_count_is_capped() {
        let service = Arc::new(ScriptedCompletion::new().reply("x").reply("y"));
        let mut d = dispatcher(service.clone(), 1);
        d.config.max_chunks = 2;
        let acc = d
            .dispatch(
                Prompt::User("a b c".into()),
                text,
                merge::concat_text,
                None,
                Accumulator::new(),
            )
            .await
            .unwrap();
        assert_eq!(acc.dropped, 3);
        assert_eq!(service.requests().len(), 2);
    }

    #[tokio::test]
    async fn seeded_accumulator_is_merged_into() {
        let service = Arc::new(ScriptedCompletion::new().reply("[\"b\"]"));
        let parse = |s: &str| serde_json::from_str::<Vec<String>>(s).map_err(|e| e.to_string());
        let acc = dispatcher(service, 100)
            .dispatch(
                Prompt::User("q".into()),
                parse,
                merge::extend,
                None,
                Accumulator::seeded(vec!["a".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(acc.into_value(), Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn mock_short_circuits_without_calling_the_service() {
        let service = Arc::new(ScriptedCompletion::new());
        let mut d = dispatcher(service.clone(), 100);
        d.config.mock = true;
        let acc = d
            .dispatch(
                Prompt::User("reply in JSON".into()),
                |s: &str| serde_json::from_str::<serde_json::Value>(s).map_err(|e| e.to_string()),
                merge::last_wins,
                None,
                Accumulator::new(),
            )
            .await
            .unwrap();
        assert!(acc.value().and_then(|v| v.get("functional_coverage")).is_some());
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn continuation_runs_inside_each_call() {
        let service = Arc::new(ScriptedCompletion::new().reply("half ...").reply("rest"));
        let mut d = dispatcher(service.clone(), 100);
        d.config.continuation_steps = 3;
        let acc = d
            .dispatch(
                Prompt::User("q".into()),
                text,
                merge::concat_text,
                None,
                Accumulator::new(),
            )
            .await
            .unwrap();
        assert_eq!(acc.into_value().as_deref(), Some("half ...\nrest"));
        assert_eq!(service.requests().len(), 2);
    }
}
