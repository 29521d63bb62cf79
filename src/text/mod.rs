//! Text processing modules
//!
//! - Tweet cleaning (URLs, mentions, emoji, punctuation)
//! - Contraction table and combinatorial expansion
//! - Subword tokenization for the scoring/classification models

mod cleaner;
mod contractions;
mod expander;
mod tokenizer;

pub use cleaner::{CleanMode, TextCleaner};
pub use contractions::ContractionTable;
pub use expander::{CandidateSet, ContractionExpander, DEFAULT_MAX_CANDIDATES};
pub use tokenizer::SubwordTokenizer;
