//! BERT encoder
//!
//! Bidirectional transformer encoder with post-layer-norm blocks, plus the
//! masked-language-model head used by the fluency scorer. Tensor names follow
//! the upstream checkpoints (`embeddings.word_embeddings`,
//! `encoder.layer.N.attention.self.query`, ...).

use anyhow::{bail, Result};
use candle_core::{Tensor, D};
use candle_nn::{embedding, layer_norm, linear, ops, Embedding, LayerNorm, Linear, Module, VarBuilder};

use super::EncoderConfig;

/// Word + position + token-type embeddings with a final layer norm.
struct BertEmbeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    layer_norm: LayerNorm,
}

impl BertEmbeddings {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        Ok(Self {
            word: embedding(config.vocab_size, dim, vb.pp("word_embeddings"))?,
            position: embedding(config.max_position_embeddings, dim, vb.pp("position_embeddings"))?,
            token_type: embedding(config.type_vocab_size, dim, vb.pp("token_type_embeddings"))?,
            layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, ids.device())?.unsqueeze(0)?;

        let hidden = self.word.forward(ids)?;
        let hidden = hidden.broadcast_add(&self.position.forward(&positions)?)?;
        // Single-sentence input: every token is segment 0.
        let hidden = hidden.broadcast_add(&self.token_type.forward(&ids.zeros_like()?)?)?;
        self.layer_norm.forward(&hidden).map_err(Into::into)
    }
}

/// One post-norm encoder block: bidirectional self-attention then FFN.
struct BertLayer {
    query: Linear,
    key: Linear,
    value: Linear,
    attn_output: Linear,
    attn_layer_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_layer_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl BertLayer {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        let num_heads = config.num_attention_heads;
        if dim % num_heads != 0 {
            bail!("hidden size {} not divisible by {} heads", dim, num_heads);
        }

        Ok(Self {
            query: linear(dim, dim, vb.pp("attention.self.query"))?,
            key: linear(dim, dim, vb.pp("attention.self.key"))?,
            value: linear(dim, dim, vb.pp("attention.self.value"))?,
            attn_output: linear(dim, dim, vb.pp("attention.output.dense"))?,
            attn_layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("attention.output.LayerNorm"))?,
            intermediate: linear(dim, config.intermediate_size, vb.pp("intermediate.dense"))?,
            output: linear(config.intermediate_size, dim, vb.pp("output.dense"))?,
            output_layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("output.LayerNorm"))?,
            num_heads,
            head_dim: dim / num_heads,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;

        let q = self.query.forward(x)?;
        let k = self.key.forward(x)?;
        let v = self.value.forward(x)?;

        // Reshape for multi-head attention
        let q = q
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = k
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = v
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;

        let scale = (self.head_dim as f64).sqrt();
        let attn = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? / scale)?;
        let attn = ops::softmax(&attn, D::Minus1)?;
        let attn_out = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.num_heads * self.head_dim))?;
        let attn_out = self.attn_output.forward(&attn_out)?;

        // Post-norm residuals
        let x = self.attn_layer_norm.forward(&(x + attn_out)?)?;

        let ffn = self.intermediate.forward(&x)?.gelu_erf()?;
        let ffn = self.output.forward(&ffn)?;
        self.output_layer_norm.forward(&(x + ffn)?).map_err(Into::into)
    }
}

/// BERT encoder stack.
pub struct BertEncoder {
    embeddings: BertEmbeddings,
    layers: Vec<BertLayer>,
    hidden_size: usize,
}

impl BertEncoder {
    /// Build the encoder from weights rooted at `vb`.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let embeddings = BertEmbeddings::new(config, vb.pp("embeddings"))?;
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(BertLayer::new(config, vb.pp(format!("encoder.layer.{}", i)))?);
        }
        Ok(Self {
            embeddings,
            layers,
            hidden_size: config.hidden_size,
        })
    }

    /// Final hidden states for token ids of shape `(batch, seq)`.
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let mut hidden = self.embeddings.forward(ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }
        Ok(hidden)
    }

    /// Hidden state width.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

/// Masked-language-model prediction head: transform + layer norm + projection
/// back onto the vocabulary.
pub struct BertMlmHead {
    transform: Linear,
    layer_norm: LayerNorm,
    decoder: Linear,
}

impl BertMlmHead {
    /// Build the head from weights rooted at `vb` (`cls.predictions` in
    /// upstream checkpoints).
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        Ok(Self {
            transform: linear(dim, dim, vb.pp("transform.dense"))?,
            layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("transform.LayerNorm"))?,
            decoder: linear(dim, config.vocab_size, vb.pp("decoder"))?,
        })
    }

    /// Per-position vocabulary logits of shape `(batch, seq, vocab)`.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let x = self.transform.forward(hidden)?.gelu_erf()?;
        let x = self.layer_norm.forward(&x)?;
        self.decoder.forward(&x).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn tiny_config() -> EncoderConfig {
        serde_json::from_str(
            r#"{
                "model_type": "bert",
                "vocab_size": 32,
                "hidden_size": 16,
                "num_hidden_layers": 2,
                "num_attention_heads": 4,
                "intermediate_size": 32,
                "max_position_embeddings": 64
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_forward_shapes() {
        let device = Device::Cpu;
        let config = tiny_config();
        let vb = VarBuilder::zeros(DType::F32, &device);
        let encoder = BertEncoder::new(&config, vb).unwrap();

        let ids = Tensor::new(&[[1u32, 5, 9, 2]], &device).unwrap();
        let hidden = encoder.forward(&ids).unwrap();
        assert_eq!(hidden.dims3().unwrap(), (1, 4, 16));
    }

    #[test]
    fn test_mlm_head_projects_to_vocab() {
        let device = Device::Cpu;
        let config = tiny_config();
        let vb = VarBuilder::zeros(DType::F32, &device);
        let encoder = BertEncoder::new(&config, vb.pp("bert")).unwrap();
        let head = BertMlmHead::new(&config, vb.pp("cls.predictions")).unwrap();

        let ids = Tensor::new(&[[1u32, 5, 9]], &device).unwrap();
        let logits = head.forward(&encoder.forward(&ids).unwrap()).unwrap();
        assert_eq!(logits.dims3().unwrap(), (1, 3, 32));
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let device = Device::Cpu;
        let mut config = tiny_config();
        config.num_attention_heads = 3;
        let vb = VarBuilder::zeros(DType::F32, &device);
        assert!(BertEncoder::new(&config, vb).is_err());
    }
}
