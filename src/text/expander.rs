//! Contraction expansion
//!
//! Expands a cleaned sentence into the full set of candidate de-contracted
//! sentences: one candidate per combination of expansion options across the
//! sentence's tokens. A token with no table entry contributes its lowercase
//! self as the sole option, so the candidate set is never empty.

use tracing::warn;

use super::ContractionTable;

/// Default upper bound on candidate enumeration.
pub const DEFAULT_MAX_CANDIDATES: usize = 512;

/// Ordered set of candidate sentences derived from one cleaned input.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    candidates: Vec<String>,
    truncated: bool,
}

impl CandidateSet {
    /// Candidates in deterministic Cartesian-product order.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Whether enumeration stopped at the configured cap before covering the
    /// full combinatorial space.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Number of enumerated candidates. Always at least 1.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Never true: a cleaned text of zero tokens still yields one empty
    /// candidate.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Iterate candidates in order.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.candidates.iter()
    }
}

/// Expands cleaned text against a contraction table.
#[derive(Debug, Clone)]
pub struct ContractionExpander {
    table: ContractionTable,
    max_candidates: usize,
}

impl ContractionExpander {
    /// Create an expander over an immutable table with the default cap.
    pub fn new(table: ContractionTable) -> Self {
        Self::with_max_candidates(table, DEFAULT_MAX_CANDIDATES)
    }

    /// Create an expander with an explicit candidate cap.
    pub fn with_max_candidates(table: ContractionTable, max_candidates: usize) -> Self {
        Self {
            table,
            max_candidates: max_candidates.max(1),
        }
    }

    /// The table backing this expander.
    pub fn table(&self) -> &ContractionTable {
        &self.table
    }

    /// Expand cleaned text into its candidate sentences.
    ///
    /// Tokens are whitespace-delimited. Each token's option list is its table
    /// entry (in stored order) or the lowercased token itself. Candidates are
    /// enumerated in lexicographic product order with the rightmost token
    /// varying fastest, joined with single spaces, then stripped of residual
    /// apostrophes (needed only to match table keys, never wanted in output).
    pub fn expand(&self, cleaned: &str) -> CandidateSet {
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();

        if tokens.is_empty() {
            return CandidateSet {
                candidates: vec![String::new()],
                truncated: false,
            };
        }

        let options: Vec<Vec<String>> = tokens
            .iter()
            .map(|token| match self.table.options(token) {
                Some(expansions) => expansions.to_vec(),
                None => vec![token.to_lowercase()],
            })
            .collect();

        let total = options
            .iter()
            .map(|opts| opts.len())
            .try_fold(1usize, |acc, n| acc.checked_mul(n));
        let truncated = total.map_or(true, |t| t > self.max_candidates);
        if truncated {
            warn!(
                cap = self.max_candidates,
                "candidate space exceeds cap, enumerating a deterministic prefix"
            );
        }

        let mut candidates = Vec::new();
        let mut indices = vec![0usize; options.len()];
        loop {
            let sentence = options
                .iter()
                .zip(&indices)
                .map(|(opts, &i)| opts[i].as_str())
                .collect::<Vec<_>>()
                .join(" ")
                .replace('\'', "");
            candidates.push(sentence);

            if candidates.len() >= self.max_candidates {
                break;
            }

            // Odometer increment, rightmost position fastest.
            let mut pos = options.len();
            loop {
                if pos == 0 {
                    break;
                }
                pos -= 1;
                indices[pos] += 1;
                if indices[pos] < options[pos].len() {
                    break;
                }
                indices[pos] = 0;
            }
            if indices.iter().all(|&i| i == 0) {
                break;
            }
        }

        CandidateSet {
            candidates,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table(pairs: &[(&str, &[&str])]) -> ContractionTable {
        let entries: HashMap<String, Vec<String>> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        ContractionTable::from_entries(entries).unwrap()
    }

    fn default_table() -> ContractionTable {
        table(&[
            ("can't", &["can not", "cannot"]),
            ("won't", &["will not"]),
            ("y'all've", &["you all have"]),
        ])
    }

    #[test]
    fn test_no_contractions_single_candidate() {
        let expander = ContractionExpander::new(default_table());
        let set = expander.expand("lol that was hilarious");
        assert_eq!(set.candidates(), ["lol that was hilarious"]);
        assert!(!set.truncated());
    }

    #[test]
    fn test_unknown_tokens_lowercased() {
        let expander = ContractionExpander::new(default_table());
        let set = expander.expand("This Was HILARIOUS");
        assert_eq!(set.candidates(), ["this was hilarious"]);
    }

    #[test]
    fn test_ambiguous_token_branches() {
        let expander = ContractionExpander::new(default_table());
        let set = expander.expand("I can't go");
        assert_eq!(set.candidates(), ["i can not go", "i cannot go"]);
    }

    #[test]
    fn test_product_order_rightmost_fastest() {
        let expander = ContractionExpander::new(table(&[
            ("a'", &["a1", "a2"]),
            ("b'", &["b1", "b2"]),
        ]));
        let set = expander.expand("a' b'");
        assert_eq!(set.candidates(), ["a1 b1", "a1 b2", "a2 b1", "a2 b2"]);
    }

    #[test]
    fn test_double_contraction_multi_word() {
        let expander = ContractionExpander::new(default_table());
        let set = expander.expand("y'all've gone");
        assert_eq!(set.candidates(), ["you all have gone"]);
    }

    #[test]
    fn test_apostrophes_stripped_after_join() {
        let expander = ContractionExpander::new(default_table());
        // "rock'n" has no table entry: falls back to itself, apostrophe-free.
        let set = expander.expand("rock'n roll");
        assert_eq!(set.candidates(), ["rockn roll"]);
    }

    #[test]
    fn test_empty_text_yields_one_empty_candidate() {
        let expander = ContractionExpander::new(default_table());
        let set = expander.expand("");
        assert_eq!(set.candidates(), [""]);
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_cap_truncates_deterministically() {
        let expander = ContractionExpander::with_max_candidates(
            table(&[("x'", &["x1", "x2"])]),
            4,
        );
        let set = expander.expand("x' x' x'");
        assert!(set.truncated());
        assert_eq!(
            set.candidates(),
            ["x1 x1 x1", "x1 x1 x2", "x1 x2 x1", "x1 x2 x2"]
        );
    }

    #[test]
    fn test_candidate_count_law() {
        let expander = ContractionExpander::new(default_table());
        // can't (2) * won't (1) * plain (1) * can't (2) = 4
        let set = expander.expand("can't won't stop can't");
        assert_eq!(set.len(), 4);
    }
}
