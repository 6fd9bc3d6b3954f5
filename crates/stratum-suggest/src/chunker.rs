use std::ops::Range;

use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Fits the bound; the only chunk is the input itself.
    Single,
    Tokens,
    /// Tokenizer failed; fixed-size character slices.
    Characters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub chunks: Vec<String>,
    pub strategy: SplitStrategy,
}

/// Partition `total` tokens into `ceil(total / max)` contiguous ranges whose
/// sizes differ by at most one, larger ranges first.
pub fn partition(total: usize, max_tokens: usize) -> Vec<Range<usize>> {
    let max_tokens = max_tokens.max(1);
    if total <= max_tokens {
        return vec![0..total];
    }
    let n = total.div_ceil(max_tokens);
    let base = total / n;
    let remainder = total % n;

    let mut ranges = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = base + usize::from(i < remainder);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Split `text` into token-bounded chunks, in order.
///
/// A tokenizer failure degrades to a character split of
/// `max_tokens * chars_per_token` characters per chunk.
pub fn split_text(
    text: &str,
    tokenizer: &dyn Tokenizer,
    max_tokens: usize,
    chars_per_token: usize,
) -> Split {
    match split_by_tokens(text, tokenizer, max_tokens) {
        Ok(split) => split,
        Err(e) => {
            log::warn!("tokenizer failed ({e}), falling back to character split");
            split_by_chars(text, max_tokens.max(1) * chars_per_token.max(1))
        }
    }
}

fn split_by_tokens(
    text: &str,
    tokenizer: &dyn Tokenizer,
    max_tokens: usize,
) -> Result<Split, crate::error::TokenizerError> {
    let chunks = tokenizer.split(text, max_tokens)?;
    if chunks.len() <= 1 {
        return Ok(Split {
            chunks: vec![text.to_string()],
            strategy: SplitStrategy::Single,
        });
    }
    log::debug!("split text into {} chunks of at most {max_tokens} tokens", chunks.len());
    Ok(Split {
        chunks,
        strategy: SplitStrategy::Tokens,
    })
}

fn split_by_chars(text: &str, max_chars: usize) -> Split {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return Split {
            chunks: vec![text.to_string()],
            strategy: SplitStrategy::Single,
        };
    }
    Split {
        chunks: chars.chunks(max_chars).map(|c| c.iter().collect()).collect(),
        strategy: SplitStrategy::Characters,
    }
}
