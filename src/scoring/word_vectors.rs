//! Word-vector distance scorer
//!
//! Scores a candidate by how far its word-level content drifts from the
//! original sentence in a pretrained static embedding space. The distance is
//! a symmetric relaxed word-mover bound: every word on each side is matched
//! to its nearest counterpart on the other, the per-side averages are taken,
//! and the larger of the two is the sentence distance. Selecting the minimum
//! penalizes over-aggressive or semantically-drifting expansions.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ScoreError;

use super::{Direction, SentenceScorer};

/// Static word -> embedding table in word2vec text format.
#[derive(Debug, Clone)]
pub struct VectorTable {
    vectors: HashMap<String, Vec<f32>>,
    dim: usize,
}

impl VectorTable {
    /// Load a table from a word2vec-style text file: an optional
    /// `count dim` header line, then one `word v1 .. vn` row per line.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read vector table {:?}", path))?;

        let mut vectors = HashMap::new();
        let mut dim = 0usize;
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let word = fields.next().unwrap();
            let values: Vec<f32> = fields
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("{:?} line {}: bad float", path, line_no + 1))?;

            // word2vec text files open with a "count dim" header row.
            if line_no == 0 && values.len() == 1 && word.parse::<usize>().is_ok() {
                continue;
            }
            if values.is_empty() {
                bail!("{:?} line {}: no vector components", path, line_no + 1);
            }
            if dim == 0 {
                dim = values.len();
            } else if values.len() != dim {
                bail!(
                    "{:?} line {}: expected {} components, found {}",
                    path,
                    line_no + 1,
                    dim,
                    values.len()
                );
            }
            vectors.insert(word.to_string(), values);
        }

        Self::from_entries(vectors)
    }

    /// Build a table from parsed entries, validating non-emptiness and a
    /// consistent dimensionality.
    pub fn from_entries(vectors: HashMap<String, Vec<f32>>) -> Result<Self> {
        let mut dims = vectors.values().map(Vec::len);
        let dim = match dims.next() {
            Some(d) if d > 0 => d,
            _ => bail!("vector table is empty"),
        };
        if dims.any(|d| d != dim) {
            bail!("vector table has inconsistent dimensionality");
        }
        Ok(Self { vectors, dim })
    }

    /// Embedding for a word, if known.
    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.vectors.get(word).map(Vec::as_slice)
    }

    /// Embedding dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of words in the table.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the table has no entries. Always false for a loaded table.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Embedding-distance scorer. Selection direction: minimum.
pub struct WordVectorScorer {
    table: VectorTable,
}

impl WordVectorScorer {
    /// Create a scorer over a loaded vector table.
    pub fn new(table: VectorTable) -> Self {
        Self { table }
    }

    /// Load the vector table from disk and wrap it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(VectorTable::load(path)?))
    }

    fn sentence_vectors<'a>(&'a self, sentence: &str) -> Vec<&'a [f32]> {
        sentence
            .split_whitespace()
            .filter_map(|word| self.table.get(word))
            .collect()
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (x - y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Average nearest-neighbor distance from each vector in `from` to `to`.
fn directed_distance(from: &[&[f32]], to: &[&[f32]]) -> f64 {
    let total: f64 = from
        .iter()
        .map(|a| {
            to.iter()
                .map(|b| euclidean(a, b))
                .fold(f64::INFINITY, f64::min)
        })
        .sum();
    total / from.len() as f64
}

impl SentenceScorer for WordVectorScorer {
    fn direction(&self) -> Direction {
        Direction::Minimize
    }

    fn score(&self, original: &str, candidate: &str) -> Result<f64, ScoreError> {
        let original_vecs = self.sentence_vectors(original);
        let candidate_vecs = self.sentence_vectors(candidate);

        if original_vecs.is_empty() || candidate_vecs.is_empty() {
            return Err(ScoreError::NoComparableTokens);
        }

        let forward = directed_distance(&original_vecs, &candidate_vecs);
        let backward = directed_distance(&candidate_vecs, &original_vecs);
        Ok(forward.max(backward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> VectorTable {
        let entries: HashMap<String, Vec<f32>> = [
            ("can", vec![1.0, 0.0]),
            ("cannot", vec![0.9, 0.1]),
            ("not", vec![0.8, 0.2]),
            ("go", vec![0.0, 1.0]),
            ("banana", vec![-5.0, -5.0]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        VectorTable::from_entries(entries).unwrap()
    }

    #[test]
    fn test_identical_sentences_have_zero_distance() {
        let scorer = WordVectorScorer::new(table());
        let d = scorer.score("can not go", "can not go").unwrap();
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_drifting_candidate_scores_farther() {
        let scorer = WordVectorScorer::new(table());
        let close = scorer.score("can not go", "cannot go").unwrap();
        let far = scorer.score("can not go", "banana banana").unwrap();
        assert!(close < far);
    }

    #[test]
    fn test_unknown_words_are_skipped() {
        let scorer = WordVectorScorer::new(table());
        // "zzz" is out of vocabulary; the rest still compares.
        let d = scorer.score("can go", "can zzz go").unwrap();
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_no_comparable_tokens_is_an_error() {
        let scorer = WordVectorScorer::new(table());
        assert!(matches!(
            scorer.score("zzz yyy", "can go"),
            Err(ScoreError::NoComparableTokens)
        ));
    }

    #[test]
    fn test_load_rejects_ragged_rows() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2 3").unwrap();
        writeln!(file, "alpha 0.1 0.2 0.3").unwrap();
        writeln!(file, "beta 0.4 0.5").unwrap();
        assert!(VectorTable::load(file.path()).is_err());
    }

    #[test]
    fn test_load_accepts_header() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2 2").unwrap();
        writeln!(file, "alpha 0.1 0.2").unwrap();
        writeln!(file, "beta 0.3 0.4").unwrap();
        let table = VectorTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.dim(), 2);
    }
}
