//! Preprocessing pipeline
//!
//! Orchestrates the normalization stages for one tweet:
//! 1. Clean the raw text (URLs, mentions, emoji, punctuation)
//! 2. Expand contractions into the candidate sentence space
//! 3. Score every candidate with the configured oracle
//! 4. Select the best-scoring candidate
//!
//! Data flows strictly left to right; candidates are scored independently
//! against immutable shared state, so a pipeline can serve concurrent
//! requests without locking.

use anyhow::{Context, Result};
use candle_core::Device;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{PipelineConfig, ScoringStrategy};
use crate::error::PreprocessError;
use crate::scoring::{MaskedLmScorer, SentenceScorer, WordVectorScorer};
use crate::text::{ContractionExpander, ContractionTable, TextCleaner};

/// The preprocessing orchestrator. Owns its dependencies; all of them are
/// injected at construction, never global.
pub struct Preprocessor {
    cleaner: TextCleaner,
    expander: ContractionExpander,
    scorer: Box<dyn SentenceScorer>,
    timeout: Option<Duration>,
}

impl Preprocessor {
    /// Assemble a pipeline from parts. Tests pass fake scorers here.
    pub fn new(
        cleaner: TextCleaner,
        expander: ContractionExpander,
        scorer: Box<dyn SentenceScorer>,
    ) -> Self {
        Self {
            cleaner,
            expander,
            scorer,
            timeout: None,
        }
    }

    /// Set a per-request scoring deadline. On expiry, remaining candidates
    /// are abandoned and the lowest-index candidate is returned.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wire the production pipeline described by a config file.
    pub fn from_config(config: &PipelineConfig, device: &Device) -> Result<Self> {
        let table = ContractionTable::load(&config.contractions)?;
        let cleaner = TextCleaner::new(config.cleaning.mode);
        let expander =
            ContractionExpander::with_max_candidates(table, config.scoring.max_candidates);

        let scorer: Box<dyn SentenceScorer> = match config.scoring.strategy {
            ScoringStrategy::MaskedLm => {
                let section = config
                    .masked_lm
                    .as_ref()
                    .context("scoring strategy is masked-lm but the masked_lm section is missing")?;
                Box::new(MaskedLmScorer::load(&section.model_dir, device)?)
            }
            ScoringStrategy::WordVectors => {
                let section = config.word_vectors.as_ref().context(
                    "scoring strategy is word-vectors but the word_vectors section is missing",
                )?;
                Box::new(WordVectorScorer::load(&section.vectors)?)
            }
        };

        let mut pipeline = Self::new(cleaner, expander, scorer);
        pipeline.timeout = config.scoring.timeout_ms.map(Duration::from_millis);
        Ok(pipeline)
    }

    /// The cleaner this pipeline runs.
    pub fn cleaner(&self) -> &TextCleaner {
        &self.cleaner
    }

    /// Normalize one tweet: clean, expand, score, select.
    ///
    /// Individual scoring failures exclude only that candidate; the request
    /// fails with [`PreprocessError::NoCandidateScored`] only when every
    /// candidate was rejected.
    pub fn preprocess(&self, text: &str) -> Result<String, PreprocessError> {
        let cleaned = self.cleaner.clean(text);
        let candidates = self.expander.expand(&cleaned);
        debug!(candidates = candidates.len(), "expanded candidate set");

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut best: Option<(usize, f64)> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(
                        scored = index,
                        remaining = candidates.len() - index,
                        "scoring deadline expired, falling back to first candidate"
                    );
                    return Ok(candidates.candidates()[0].clone());
                }
            }

            match self.scorer.score(&cleaned, candidate) {
                Ok(score) => {
                    let improves = match best {
                        Some((_, best_score)) => {
                            self.scorer.direction().improves(score, best_score)
                        }
                        None => true,
                    };
                    if improves {
                        best = Some((index, score));
                    }
                }
                Err(err) => {
                    warn!(candidate = index, %err, "candidate excluded from selection");
                }
            }
        }

        match best {
            Some((index, score)) => {
                debug!(selected = index, score, "candidate selected");
                Ok(candidates.candidates()[index].clone())
            }
            None => Err(PreprocessError::NoCandidateScored {
                attempted: candidates.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoreError;
    use crate::scoring::Direction;
    use std::collections::HashMap;

    fn table() -> ContractionTable {
        let entries: HashMap<String, Vec<String>> = [(
            "can't".to_string(),
            vec!["can not".to_string(), "cannot".to_string()],
        )]
        .into_iter()
        .collect();
        ContractionTable::from_entries(entries).unwrap()
    }

    /// Scores a candidate by a fixed keyword preference.
    struct KeywordScorer {
        keyword: &'static str,
        direction: Direction,
    }

    impl SentenceScorer for KeywordScorer {
        fn direction(&self) -> Direction {
            self.direction
        }

        fn score(&self, _original: &str, candidate: &str) -> Result<f64, ScoreError> {
            Ok(if candidate.contains(self.keyword) { 1.0 } else { 0.0 })
        }
    }

    struct FailingScorer;

    impl SentenceScorer for FailingScorer {
        fn direction(&self) -> Direction {
            Direction::Maximize
        }

        fn score(&self, _original: &str, _candidate: &str) -> Result<f64, ScoreError> {
            Err(ScoreError::Inference("oracle unavailable".into()))
        }
    }

    fn pipeline(scorer: Box<dyn SentenceScorer>) -> Preprocessor {
        Preprocessor::new(
            TextCleaner::default(),
            ContractionExpander::new(table()),
            scorer,
        )
    }

    #[test]
    fn test_selects_preferred_candidate() {
        let p = pipeline(Box::new(KeywordScorer {
            keyword: "cannot",
            direction: Direction::Maximize,
        }));
        assert_eq!(p.preprocess("I can't go").unwrap(), "i cannot go");
    }

    #[test]
    fn test_minimize_direction_inverts_selection() {
        let p = pipeline(Box::new(KeywordScorer {
            keyword: "cannot",
            direction: Direction::Minimize,
        }));
        assert_eq!(p.preprocess("I can't go").unwrap(), "i can not go");
    }

    #[test]
    fn test_ties_break_to_earliest_candidate() {
        let p = pipeline(Box::new(KeywordScorer {
            keyword: "never-present",
            direction: Direction::Maximize,
        }));
        // Both candidates score 0.0; product order puts "can not" first.
        assert_eq!(p.preprocess("I can't go").unwrap(), "i can not go");
    }

    #[test]
    fn test_all_failures_is_fatal() {
        let p = pipeline(Box::new(FailingScorer));
        let err = p.preprocess("I can't go").unwrap_err();
        assert!(matches!(
            err,
            PreprocessError::NoCandidateScored { attempted: 2 }
        ));
    }

    #[test]
    fn test_zero_timeout_falls_back_to_first_candidate() {
        let p = pipeline(Box::new(KeywordScorer {
            keyword: "cannot",
            direction: Direction::Maximize,
        }))
        .with_timeout(Duration::from_millis(0));
        assert_eq!(p.preprocess("I can't go").unwrap(), "i can not go");
    }
}
