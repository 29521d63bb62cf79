//! Pipeline configuration
//!
//! One YAML file loaded at process start describes the whole pipeline: the
//! contraction table, the cleaning variant, the scoring strategy and its
//! model resources, and the downstream classifier. A missing or malformed
//! config is fatal; the process refuses to serve rather than degrade.

use anyhow::{Context, Result};
use candle_core::Device;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::classifier::DEFAULT_THRESHOLD;
use crate::text::{CleanMode, DEFAULT_MAX_CANDIDATES};

/// Which scoring oracle selects among candidate expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ScoringStrategy {
    /// Masked-language-model fluency (select maximum)
    #[default]
    #[serde(rename = "masked-lm")]
    MaskedLm,
    /// Word-vector distance to the original (select minimum)
    #[serde(rename = "word-vectors")]
    WordVectors,
}

/// Cleaning section.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CleaningConfig {
    /// Policy variant; strict unless configured otherwise
    #[serde(default)]
    pub mode: CleanMode,
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

/// Scoring section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScoringConfig {
    /// Active scorer strategy
    #[serde(default)]
    pub strategy: ScoringStrategy,
    /// Cap on enumerated candidates per request
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Optional per-request scoring deadline in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            strategy: ScoringStrategy::default(),
            max_candidates: DEFAULT_MAX_CANDIDATES,
            timeout_ms: None,
        }
    }
}

/// Masked-LM scorer resources.
#[derive(Debug, Clone, Deserialize)]
pub struct MaskedLmConfig {
    /// Directory holding `config.json`, `tokenizer.json`,
    /// `model.safetensors`
    pub model_dir: PathBuf,
}

/// Word-vector scorer resources.
#[derive(Debug, Clone, Deserialize)]
pub struct WordVectorsConfig {
    /// word2vec-text-format vector file
    pub vectors: PathBuf,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

/// Classifier section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Directory holding the classifier checkpoint
    pub model_dir: PathBuf,
    /// Offensiveness probability threshold
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

/// Whole-pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Path to the contraction table JSON
    pub contractions: PathBuf,
    /// Cleaning options
    #[serde(default)]
    pub cleaning: CleaningConfig,
    /// Scoring options
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Masked-LM resources; required when the strategy is `masked-lm`
    #[serde(default)]
    pub masked_lm: Option<MaskedLmConfig>,
    /// Word-vector resources; required when the strategy is `word-vectors`
    #[serde(default)]
    pub word_vectors: Option<WordVectorsConfig>,
    /// Downstream classifier; required for the classify command
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    /// Whether to run model inference on GPU when available
    #[serde(default)]
    pub use_gpu: bool,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        serde_yaml::from_str(&content).with_context(|| format!("malformed config {:?}", path))
    }

    /// Device selection for model inference.
    pub fn device(&self) -> Result<Device> {
        if self.use_gpu {
            Device::cuda_if_available(0).map_err(Into::into)
        } else {
            Ok(Device::Cpu)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
contractions: data/contractions.json
cleaning:
  mode: legacy
scoring:
  strategy: word-vectors
  max_candidates: 64
  timeout_ms: 2000
word_vectors:
  vectors: data/vectors.txt
classifier:
  model_dir: models/distilbert
  threshold: 0.6
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cleaning.mode, CleanMode::Legacy);
        assert_eq!(config.scoring.strategy, ScoringStrategy::WordVectors);
        assert_eq!(config.scoring.max_candidates, 64);
        assert_eq!(config.scoring.timeout_ms, Some(2000));
        assert_eq!(config.classifier.unwrap().threshold, 0.6);
        assert!(!config.use_gpu);
    }

    #[test]
    fn test_defaults() {
        let config: PipelineConfig =
            serde_yaml::from_str("contractions: data/contractions.json").unwrap();
        assert_eq!(config.cleaning.mode, CleanMode::Strict);
        assert_eq!(config.scoring.strategy, ScoringStrategy::MaskedLm);
        assert_eq!(config.scoring.max_candidates, DEFAULT_MAX_CANDIDATES);
        assert_eq!(config.scoring.timeout_ms, None);
    }
}
