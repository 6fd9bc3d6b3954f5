use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use unicode_segmentation::UnicodeSegmentation;

use crate::chunker::partition;
use crate::error::TokenizerError;

/// Distinct segments [`SegmentTokenizer::encode`] will intern before failing.
pub const MAX_SEGMENTS: usize = 1 << 16;

/// Text to token ids and back. Any contiguous id range must decode to valid text.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError>;
    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError>;

    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.encode(text)?.len())
    }

    /// `text` cut at token boundaries into the ranges chosen by
    /// [`partition`]; the text itself when it fits `max_tokens`.
    fn split(&self, text: &str, max_tokens: usize) -> Result<Vec<String>, TokenizerError> {
        let ids = self.encode(text)?;
        if ids.len() <= max_tokens.max(1) {
            return Ok(vec![text.to_string()]);
        }
        partition(ids.len(), max_tokens)
            .into_iter()
            .map(|range| self.decode(&ids[range]))
            .collect()
    }
}

/// Rough token count from a characters-per-token ratio.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

// --- Built-in segment tokenizer ---

#[derive(Debug, Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    segments: Vec<String>,
}

/// Splits on Unicode word boundaries.
///
/// Word, punctuation and whitespace runs each become one token. Counting and
/// splitting work on the segments directly and leave the vocabulary alone;
/// only explicit [`encode`](Tokenizer::encode) calls intern segments, up to
/// [`MAX_SEGMENTS`] of them.
#[derive(Debug, Default)]
pub struct SegmentTokenizer {
    vocab: RwLock<Vocab>,
}

impl SegmentTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.read().map_or(0, |v| v.segments.len())
    }
}

fn poisoned<T>(_: T) -> TokenizerError {
    TokenizerError::Backend("vocabulary lock poisoned".to_string())
}

impl Tokenizer for SegmentTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut vocab = self.vocab.write().map_err(poisoned)?;
        let mut ids = Vec::new();
        for segment in text.split_word_bounds() {
            let id = match vocab.ids.get(segment) {
                Some(id) => *id,
                None => {
                    if vocab.segments.len() >= MAX_SEGMENTS {
                        return Err(TokenizerError::Backend("vocabulary full".to_string()));
                    }
                    let id = u32::try_from(vocab.segments.len())
                        .map_err(|_| TokenizerError::Backend("vocabulary full".to_string()))?;
                    vocab.segments.push(segment.to_string());
                    vocab.ids.insert(segment.to_string(), id);
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        let vocab = self.vocab.read().map_err(poisoned)?;
        let mut out = String::new();
        for id in ids {
            let segment = vocab
                .segments
                .get(*id as usize)
                .ok_or(TokenizerError::UnknownToken(*id))?;
            out.push_str(segment);
        }
        Ok(out)
    }

    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(text.split_word_bounds().count())
    }

    fn split(&self, text: &str, max_tokens: usize) -> Result<Vec<String>, TokenizerError> {
        let segments: Vec<&str> = text.split_word_bounds().collect();
        if segments.len() <= max_tokens.max(1) {
            return Ok(vec![text.to_string()]);
        }
        Ok(partition(segments.len(), max_tokens)
            .into_iter()
            .map(|range| segments[range].concat())
            .collect())
    }
}

// --- Hugging Face tokenizer ---

/// A model tokenizer loaded from a `tokenizer.json` file.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| TokenizerError::Load(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        self.inner
            .encode(text, false)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| TokenizerError::Backend(e.to_string()))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        self.inner
            .decode(ids, false)
            .map_err(|e| TokenizerError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn segments_round_trip() {
        let tok = SegmentTokenizer::new();
        let text = "UserService depends on UserRepository.\n  Ünïcode, ok?";
        let ids = tok.encode(text).unwrap();
        assert_eq!(tok.decode(&ids).unwrap(), text);
        assert_eq!(tok.count(text).unwrap(), ids.len());
    }

    #[test]
    fn repeated_segments_share_ids() {
        let tok = SegmentTokenizer::new();
        let ids = tok.encode("go go go").unwrap();
        assert_eq!(ids, vec![0, 1, 0, 1, 0]);
        assert_eq!(tok.vocab_size(), 2);
    }

    #[test]
    fn counting_and_splitting_leave_the_vocabulary_empty() {
        let tok = SegmentTokenizer::new();
        for i in 0..10_000 {
            let text = format!("request {i} for module M{i}");
            assert_eq!(tok.count(&text).unwrap(), 9);
            assert_eq!(tok.split(&text, 3).unwrap().concat(), text);
        }
        assert_eq!(tok.vocab_size(), 0);
    }

    #[test]
    fn encoding_stops_at_the_segment_cap() {
        let tok = SegmentTokenizer::new();
        // Distinct words plus the shared space: one segment over the cap.
        let text: String = (0..MAX_SEGMENTS).map(|i| format!("w{i} ")).collect();
        let err = tok.encode(&text).unwrap_err();
        assert!(matches!(err, TokenizerError::Backend(_)));
        assert_eq!(tok.vocab_size(), MAX_SEGMENTS);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let tok = SegmentTokenizer::new();
        assert!(matches!(tok.decode(&[7]), Err(TokenizerError::UnknownToken(7))));
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("abcdefghi", 4), 3);
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("abc", 0), 3);
    }

    #[test]
    fn missing_model_file_fails_to_load() {
        assert!(matches!(
            HfTokenizer::from_file("/nonexistent/tokenizer.json"),
            Err(TokenizerError::Load(_))
        ));
    }
}
