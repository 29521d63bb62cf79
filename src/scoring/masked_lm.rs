//! Masked-language-model fluency scorer
//!
//! Runs a candidate through a BERT masked-LM forward pass and reduces the
//! output logits to their mean, a cheap proxy for how plausible the model
//! finds the sentence. Candidates that do not fit the context window are
//! rejected (and excluded from selection), never truncated silently.

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::path::Path;

use crate::error::ScoreError;
use crate::models::{BertEncoder, BertMlmHead, EncoderConfig, ModelFamily};
use crate::text::SubwordTokenizer;

use super::{Direction, SentenceScorer};

/// BERT masked-LM scorer. Selection direction: maximum.
pub struct MaskedLmScorer {
    tokenizer: SubwordTokenizer,
    encoder: BertEncoder,
    mlm_head: BertMlmHead,
    device: Device,
    max_tokens: usize,
}

impl MaskedLmScorer {
    /// Load tokenizer, encoder and MLM head from one model directory
    /// (`config.json`, `tokenizer.json`, `model.safetensors`).
    pub fn load<P: AsRef<Path>>(model_dir: P, device: &Device) -> Result<Self> {
        let model_dir = model_dir.as_ref();

        let config = EncoderConfig::load(model_dir.join("config.json"))?;
        if config.family()? != ModelFamily::Bert {
            bail!(
                "masked-LM scorer requires a bert model, got {:?}",
                config.model_type
            );
        }

        let tokenizer = SubwordTokenizer::load(model_dir.join("tokenizer.json"))?;

        let weights = model_dir.join("model.safetensors");
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights.clone()], DType::F32, device)
        }
        .with_context(|| format!("failed to load scorer weights {:?}", weights))?;

        let encoder = BertEncoder::new(&config, vb.pp("bert"))?;
        let mlm_head = BertMlmHead::new(&config, vb.pp("cls.predictions"))?;

        Ok(Self {
            tokenizer,
            encoder,
            mlm_head,
            device: device.clone(),
            max_tokens: config.max_position_embeddings,
        })
    }

    /// Assemble a scorer from already-built parts. Exists so tests can use
    /// small configs and zero weights instead of real checkpoints.
    pub fn from_parts(
        tokenizer: SubwordTokenizer,
        encoder: BertEncoder,
        mlm_head: BertMlmHead,
        device: &Device,
        max_tokens: usize,
    ) -> Self {
        Self {
            tokenizer,
            encoder,
            mlm_head,
            device: device.clone(),
            max_tokens,
        }
    }

    fn mean_logit(&self, ids: &[u32]) -> Result<f64> {
        let input = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let hidden = self.encoder.forward(&input)?;
        let logits = self.mlm_head.forward(&hidden)?;
        let mean = logits.mean_all()?.to_scalar::<f32>()?;
        Ok(mean as f64)
    }
}

impl SentenceScorer for MaskedLmScorer {
    fn direction(&self) -> Direction {
        Direction::Maximize
    }

    fn score(&self, _original: &str, candidate: &str) -> Result<f64, ScoreError> {
        let ids = self
            .tokenizer
            .encode(candidate)
            .map_err(|e| ScoreError::Inference(e.to_string()))?;

        if ids.is_empty() {
            return Err(ScoreError::Inference("tokenizer produced no tokens".into()));
        }
        if ids.len() > self.max_tokens {
            return Err(ScoreError::ContextOverflow {
                tokens: ids.len(),
                max: self.max_tokens,
            });
        }

        self.mean_logit(&ids)
            .map_err(|e| ScoreError::Inference(e.to_string()))
    }
}
