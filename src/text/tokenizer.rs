//! Subword tokenization
//!
//! Wrapper around HuggingFace tokenizers for the scoring and classification
//! models. The text pipeline itself splits on whitespace; this adapter only
//! turns a sentence into model input ids.

use anyhow::Result;
use std::path::Path;
use tokenizers::Tokenizer;

/// Subword tokenizer backed by a serialized `tokenizer.json` file.
pub struct SubwordTokenizer {
    tokenizer: Tokenizer,
}

impl SubwordTokenizer {
    /// Load a tokenizer from a serialized tokenizer file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer {:?}: {}", path.as_ref(), e))?;
        Ok(Self { tokenizer })
    }

    /// Encode a sentence into token ids, special tokens included
    /// ([CLS] ... [SEP] for BERT-family tokenizers).
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {}", e))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Vocabulary size, special tokens included.
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}
