//! Offensive-language classifier
//!
//! The downstream consumer of the preprocessing pipeline: a sequence
//! classifier over the normalized text. The encoder family (BERT, ALBERT or
//! DistilBERT) is chosen once at load time from the model directory's config
//! discriminator; the classification head is a single linear unit over the
//! leading [CLS] hidden state, squashed through a sigmoid.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, ops, Linear, Module, VarBuilder};
use std::path::Path;
use tracing::debug;

use crate::models::{EncoderConfig, TextEncoder};
use crate::text::SubwordTokenizer;

/// Default probability threshold above which text is flagged offensive.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Categorical classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not offensive
    Normal,
    /// Offensive
    Offensive,
}

impl Decision {
    /// Map an offensiveness probability to a decision.
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability > threshold {
            Self::Offensive
        } else {
            Self::Normal
        }
    }

    /// Numeric class index (0 = normal, 1 = offensive).
    pub fn index(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Offensive => 1,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Offensive => "Offensive",
        }
    }
}

/// Transformer sequence classifier with a one-logit head.
pub struct SentimentClassifier {
    tokenizer: SubwordTokenizer,
    encoder: TextEncoder,
    cls_layer: Linear,
    device: Device,
    threshold: f64,
}

impl SentimentClassifier {
    /// Load tokenizer, encoder and classification head from one model
    /// directory (`config.json`, `tokenizer.json`, `model.safetensors`).
    pub fn load<P: AsRef<Path>>(model_dir: P, device: &Device, threshold: f64) -> Result<Self> {
        let model_dir = model_dir.as_ref();

        let config = EncoderConfig::load(model_dir.join("config.json"))?;
        let tokenizer = SubwordTokenizer::load(model_dir.join("tokenizer.json"))?;

        let weights = model_dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights.clone()], DType::F32, device)
        }
        .with_context(|| format!("failed to load classifier weights {:?}", weights))?;

        let family = config.family()?;
        let encoder = TextEncoder::new(&config, vb.pp(family.weight_prefix()))?;
        let cls_layer = linear(config.hidden_size, 1, vb.pp("cls_layer"))?;

        Ok(Self {
            tokenizer,
            encoder,
            cls_layer,
            device: device.clone(),
            threshold,
        })
    }

    /// Assemble a classifier from already-built parts (tests use small
    /// configs and zero weights).
    pub fn from_parts(
        tokenizer: SubwordTokenizer,
        encoder: TextEncoder,
        cls_layer: Linear,
        device: &Device,
        threshold: f64,
    ) -> Self {
        Self {
            tokenizer,
            encoder,
            cls_layer,
            device: device.clone(),
            threshold,
        }
    }

    /// Probability that the text is offensive.
    pub fn offensive_probability(&self, text: &str) -> Result<f64> {
        let ids = self.tokenizer.encode(text)?;
        let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let hidden = self.encoder.encode(&input)?;
        // Classification head reads the leading [CLS] position.
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let logit = self.cls_layer.forward(&cls)?;
        let probability = ops::sigmoid(&logit)?
            .squeeze(0)?
            .squeeze(0)?
            .to_scalar::<f32>()? as f64;

        debug!(probability, "classifier forward pass complete");
        Ok(probability)
    }

    /// Classify normalized text as normal or offensive.
    pub fn classify(&self, text: &str) -> Result<Decision> {
        let probability = self.offensive_probability(text)?;
        Ok(Decision::from_probability(probability, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_threshold() {
        assert_eq!(
            Decision::from_probability(0.7, DEFAULT_THRESHOLD),
            Decision::Offensive
        );
        assert_eq!(
            Decision::from_probability(0.3, DEFAULT_THRESHOLD),
            Decision::Normal
        );
        // The boundary itself is not offensive.
        assert_eq!(
            Decision::from_probability(0.5, DEFAULT_THRESHOLD),
            Decision::Normal
        );
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(Decision::Normal.index(), 0);
        assert_eq!(Decision::Offensive.index(), 1);
        assert_eq!(Decision::Offensive.label(), "Offensive");
    }
}
