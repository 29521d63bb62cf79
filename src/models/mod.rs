//! Transformer encoders for scoring and classification
//!
//! The supported model families form a closed set selected once at load time
//! by the `model_type` discriminator in the model directory's `config.json`:
//! - BERT
//! - ALBERT (factorized embeddings, one shared layer applied N times)
//! - DistilBERT (no token-type embeddings)
//!
//! All three sit behind the single `encode(ids) -> hidden states` capability;
//! the family is never re-checked per call.

pub mod albert;
pub mod bert;
pub mod distilbert;

use anyhow::{bail, Context, Result};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use serde::Deserialize;
use std::path::Path;

pub use albert::AlbertEncoder;
pub use bert::{BertEncoder, BertMlmHead};
pub use distilbert::DistilBertEncoder;

fn default_max_position_embeddings() -> usize {
    512
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

/// Encoder hyperparameters, parsed from a HuggingFace-style `config.json`.
///
/// Field aliases cover DistilBERT's divergent naming (`dim`, `n_layers`,
/// `n_heads`, `hidden_dim`) so one struct serves every family.
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    /// Family discriminator: "bert", "albert" or "distilbert"
    pub model_type: String,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Hidden state width
    #[serde(alias = "dim")]
    pub hidden_size: usize,
    /// Number of transformer layers
    #[serde(alias = "n_layers")]
    pub num_hidden_layers: usize,
    /// Number of attention heads
    #[serde(alias = "n_heads")]
    pub num_attention_heads: usize,
    /// Feed-forward inner width
    #[serde(alias = "hidden_dim")]
    pub intermediate_size: usize,
    /// Context window length
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    /// Token-type vocabulary (segment A/B); unused by DistilBERT
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    /// ALBERT factorized embedding width; `None` means embeddings are
    /// hidden-sized
    #[serde(default)]
    pub embedding_size: Option<usize>,
    /// LayerNorm epsilon
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl EncoderConfig {
    /// Parse a `config.json` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model config {:?}", path))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("malformed model config {:?}", path))?;
        config.family()?;
        Ok(config)
    }

    /// The model family named by the discriminator.
    pub fn family(&self) -> Result<ModelFamily> {
        ModelFamily::from_discriminator(&self.model_type)
    }
}

/// Supported encoder families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Plain BERT
    Bert,
    /// ALBERT
    Albert,
    /// DistilBERT
    DistilBert,
}

impl ModelFamily {
    /// Map a `model_type` discriminator string to a family. Unknown values
    /// are fatal: serving with an unsupported architecture is refused.
    pub fn from_discriminator(model_type: &str) -> Result<Self> {
        match model_type {
            "bert" => Ok(Self::Bert),
            "albert" => Ok(Self::Albert),
            "distilbert" => Ok(Self::DistilBert),
            other => bail!("unsupported model family {:?}", other),
        }
    }

    /// Root tensor-name prefix this family uses in its checkpoints.
    pub fn weight_prefix(&self) -> &'static str {
        match self {
            Self::Bert => "bert",
            Self::Albert => "albert",
            Self::DistilBert => "distilbert",
        }
    }
}

/// A loaded encoder of any supported family.
pub enum TextEncoder {
    /// BERT variant
    Bert(BertEncoder),
    /// ALBERT variant
    Albert(AlbertEncoder),
    /// DistilBERT variant
    DistilBert(DistilBertEncoder),
}

impl TextEncoder {
    /// Build the encoder named by the config's discriminator from weights
    /// rooted at `vb`.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        match config.family()? {
            ModelFamily::Bert => Ok(Self::Bert(BertEncoder::new(config, vb)?)),
            ModelFamily::Albert => Ok(Self::Albert(AlbertEncoder::new(config, vb)?)),
            ModelFamily::DistilBert => Ok(Self::DistilBert(DistilBertEncoder::new(config, vb)?)),
        }
    }

    /// Encode token ids of shape `(batch, seq)` into final hidden states of
    /// shape `(batch, seq, hidden)`.
    pub fn encode(&self, ids: &Tensor) -> Result<Tensor> {
        match self {
            Self::Bert(m) => m.forward(ids),
            Self::Albert(m) => m.forward(ids),
            Self::DistilBert(m) => m.forward(ids),
        }
    }

    /// The family this encoder was loaded as.
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::Bert(_) => ModelFamily::Bert,
            Self::Albert(_) => ModelFamily::Albert,
            Self::DistilBert(_) => ModelFamily::DistilBert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_discriminator() {
        assert_eq!(
            ModelFamily::from_discriminator("distilbert").unwrap(),
            ModelFamily::DistilBert
        );
        assert!(ModelFamily::from_discriminator("roberta").is_err());
    }

    #[test]
    fn test_config_aliases_cover_distilbert_names() {
        let json = r#"{
            "model_type": "distilbert",
            "vocab_size": 30522,
            "dim": 768,
            "n_layers": 6,
            "n_heads": 12,
            "hidden_dim": 3072
        }"#;
        let config: EncoderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.hidden_size, 768);
        assert_eq!(config.num_hidden_layers, 6);
        assert_eq!(config.num_attention_heads, 12);
        assert_eq!(config.intermediate_size, 3072);
        assert_eq!(config.max_position_embeddings, 512);
    }

    #[test]
    fn test_config_rejects_unknown_family() {
        let json = r#"{
            "model_type": "roberta",
            "vocab_size": 100,
            "hidden_size": 32,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 64
        }"#;
        let config: EncoderConfig = serde_json::from_str(json).unwrap();
        assert!(config.family().is_err());
    }
}
