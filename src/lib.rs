//! # tweetwash
//!
//! Tweet normalization for downstream offensive-language classification.
//!
//! Raw tweets are noisy: links, mentions, emoji, punctuation, and contracted
//! word forms that confuse token-level models. This crate cleans the text,
//! expands every contraction into its full-form alternatives, and uses a
//! scoring model to pick the most plausible expanded sentence.
//!
//! ## Pipeline
//!
//! 1. Clean (URLs, @mentions, emoji, emoticons, punctuation)
//! 2. Expand contractions into the Cartesian space of candidate sentences
//! 3. Score every candidate with a pluggable oracle (masked-LM fluency or
//!    word-vector distance)
//! 4. Select the best candidate
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tweetwash::{PipelineConfig, Preprocessor};
//!
//! let config = PipelineConfig::load("config.yaml")?;
//! let pipeline = Preprocessor::from_config(&config, &config.device()?)?;
//! let normalized = pipeline.preprocess("lol I can't believe it @user")?;
//! ```

// Require docs for public items, but not struct fields (too verbose)
#![warn(missing_docs)]
#![allow(rustdoc::missing_crate_level_docs)]

pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scoring;
pub mod text;

// Re-exports for convenience
pub use classifier::{Decision, SentimentClassifier};
pub use config::{PipelineConfig, ScoringStrategy};
pub use error::{PreprocessError, ScoreError};
pub use pipeline::Preprocessor;
pub use scoring::{Direction, MaskedLmScorer, SentenceScorer, WordVectorScorer};
pub use text::{CleanMode, ContractionExpander, ContractionTable, TextCleaner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
