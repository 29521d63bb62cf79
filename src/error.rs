//! Error taxonomy for the preprocessing pipeline
//!
//! Two layers, matching how failures propagate:
//! - [`ScoreError`]: a single candidate could not be scored. Recovered locally
//!   by excluding that candidate from selection.
//! - [`PreprocessError`]: the request as a whole failed. Surfaced to the
//!   caller, never swallowed.

use thiserror::Error;

/// Failure to score one candidate sentence.
///
/// These are recoverable: the orchestrator logs the failure and drops the
/// candidate from the selection pool.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Candidate does not fit the scoring model's context window.
    #[error("candidate spans {tokens} tokens, scorer context window is {max}")]
    ContextOverflow {
        /// Token count of the rejected candidate
        tokens: usize,
        /// Maximum tokens the scorer accepts
        max: usize,
    },

    /// Neither sentence contains a word known to the vector table.
    #[error("no in-vocabulary words to compare")]
    NoComparableTokens,

    /// The underlying inference call failed.
    #[error("scoring inference failed: {0}")]
    Inference(String),
}

/// Failure of a whole preprocessing request.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Every candidate was rejected by the scoring oracle; there is nothing
    /// to select. Callers must treat this as an explicit failure, not fall
    /// back to an arbitrary string.
    #[error("no candidate could be scored ({attempted} attempted)")]
    NoCandidateScored {
        /// How many candidates were tried before giving up
        attempted: usize,
    },
}
