//! Accurate token counting and greedy-pack document splitting, built on `tokenizers` +
//! `text-splitter` the way the teacher's `prepare_chunks`/`get_tokenizer` pair does.

use std::sync::OnceLock;

use common::error::AppError;
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

/// Fraction shaved off the embedding backend's declared context window before it is used
/// as a splitting ceiling, to absorb skew between this crate's tokenizer and whatever
/// tokenizer the remote embedding model actually uses.
const SAFETY_MARGIN: f64 = 0.10;

pub struct TokenizerService {
    tokenizer: &'static tokenizers::Tokenizer,
}

impl TokenizerService {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            tokenizer: get_tokenizer()?,
        })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer
            .encode(text, false)
            .map(|enc| enc.len())
            .unwrap_or_else(|_| Self::estimate_tokens(text))
    }

    pub fn count_total_tokens<I, S>(&self, chunks: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        chunks
            .into_iter()
            .map(|chunk| self.count_tokens(chunk.as_ref()))
            .sum()
    }

    /// Fast, tokenizer-free estimate (chars / 4); used when the real tokenizer fails to
    /// encode a string rather than aborting the pipeline.
    pub fn estimate_tokens(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    pub fn exceeds_context_window(&self, chunks: &[String], limit: usize) -> bool {
        self.count_total_tokens(chunks) > limit
    }

    /// Greedy-packs `text` into documents under `max_tokens`, per chunk.
    pub fn split_into_documents(&self, text: &str, max_tokens: usize) -> Result<Vec<String>, AppError> {
        if max_tokens == 0 {
            return Err(AppError::Validation("max_tokens must be greater than zero".into()));
        }

        let capacity = ChunkCapacity::new(max_tokens.saturating_sub(1).max(1)).with_max(max_tokens);
        let capacity = capacity.map_err(|err| AppError::Validation(format!("invalid chunk capacity: {err}")))?;
        let config = ChunkConfig::new(capacity).with_sizer(self.tokenizer);
        let splitter = TextSplitter::new(config);

        let mut chunks: Vec<String> = splitter.chunks(text).map(str::to_owned).collect();
        if chunks.is_empty() {
            chunks.push(String::new());
        }
        Ok(chunks)
    }

    /// `safe_limit` = `window` shaved by `SAFETY_MARGIN`, per §4.3.
    pub fn safe_limit(window: usize) -> usize {
        let margin = (window as f64 * SAFETY_MARGIN).round() as usize;
        window.saturating_sub(margin).max(1)
    }
}

fn get_tokenizer() -> Result<&'static tokenizers::Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<tokenizers::Tokenizer, String>> = OnceLock::new();

    match TOKENIZER.get_or_init(|| {
        tokenizers::Tokenizer::from_pretrained("bert-base-cased", None)
            .map_err(|err| format!("failed to initialize tokenizer: {err}"))
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::Internal(err.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_limit_shaves_ten_percent() {
        assert_eq!(TokenizerService::safe_limit(1000), 900);
    }

    #[test]
    fn estimate_tokens_is_chars_over_four() {
        assert_eq!(TokenizerService::estimate_tokens("abcd"), 1);
        assert_eq!(TokenizerService::estimate_tokens("abcde"), 2);
    }
}
