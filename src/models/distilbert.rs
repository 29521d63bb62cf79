//! DistilBERT encoder
//!
//! Distilled six-layer BERT variant: no token-type embeddings, two layer
//! norms per block. Tensor names follow upstream checkpoints
//! (`transformer.layer.N.attention.q_lin`, `sa_layer_norm`, `ffn.lin1`, ...).

use anyhow::{bail, Result};
use candle_core::{Tensor, D};
use candle_nn::{embedding, layer_norm, linear, ops, Embedding, LayerNorm, Linear, Module, VarBuilder};

use super::EncoderConfig;

struct DistilBertEmbeddings {
    word: Embedding,
    position: Embedding,
    layer_norm: LayerNorm,
}

impl DistilBertEmbeddings {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        Ok(Self {
            word: embedding(config.vocab_size, dim, vb.pp("word_embeddings"))?,
            position: embedding(config.max_position_embeddings, dim, vb.pp("position_embeddings"))?,
            layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, ids.device())?.unsqueeze(0)?;

        let hidden = self
            .word
            .forward(ids)?
            .broadcast_add(&self.position.forward(&positions)?)?;
        self.layer_norm.forward(&hidden).map_err(Into::into)
    }
}

struct TransformerBlock {
    q_lin: Linear,
    k_lin: Linear,
    v_lin: Linear,
    out_lin: Linear,
    sa_layer_norm: LayerNorm,
    ffn_lin1: Linear,
    ffn_lin2: Linear,
    output_layer_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl TransformerBlock {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        let num_heads = config.num_attention_heads;
        if dim % num_heads != 0 {
            bail!("hidden size {} not divisible by {} heads", dim, num_heads);
        }

        Ok(Self {
            q_lin: linear(dim, dim, vb.pp("attention.q_lin"))?,
            k_lin: linear(dim, dim, vb.pp("attention.k_lin"))?,
            v_lin: linear(dim, dim, vb.pp("attention.v_lin"))?,
            out_lin: linear(dim, dim, vb.pp("attention.out_lin"))?,
            sa_layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("sa_layer_norm"))?,
            ffn_lin1: linear(dim, config.intermediate_size, vb.pp("ffn.lin1"))?,
            ffn_lin2: linear(config.intermediate_size, dim, vb.pp("ffn.lin2"))?,
            output_layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("output_layer_norm"))?,
            num_heads,
            head_dim: dim / num_heads,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;

        let q = self
            .q_lin
            .forward(x)?
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .k_lin
            .forward(x)?
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .v_lin
            .forward(x)?
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;

        let scale = (self.head_dim as f64).sqrt();
        let attn = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? / scale)?;
        let attn = ops::softmax(&attn, D::Minus1)?;
        let attn_out = attn
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.num_heads * self.head_dim))?;
        let attn_out = self.out_lin.forward(&attn_out)?;

        let x = self.sa_layer_norm.forward(&(x + attn_out)?)?;

        let ffn = self.ffn_lin1.forward(&x)?.gelu_erf()?;
        let ffn = self.ffn_lin2.forward(&ffn)?;
        self.output_layer_norm.forward(&(x + ffn)?).map_err(Into::into)
    }
}

/// DistilBERT encoder stack.
pub struct DistilBertEncoder {
    embeddings: DistilBertEmbeddings,
    layers: Vec<TransformerBlock>,
    hidden_size: usize,
}

impl DistilBertEncoder {
    /// Build the encoder from weights rooted at `vb`.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let embeddings = DistilBertEmbeddings::new(config, vb.pp("embeddings"))?;
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(TransformerBlock::new(
                config,
                vb.pp(format!("transformer.layer.{}", i)),
            )?);
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

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_forward_shapes() {
        let device = Device::Cpu;
        let config: EncoderConfig = serde_json::from_str(
            r#"{
                "model_type": "distilbert",
                "vocab_size": 32,
                "dim": 16,
                "n_layers": 2,
                "n_heads": 4,
                "hidden_dim": 32,
                "max_position_embeddings": 64
            }"#,
        )
        .unwrap();

        let vb = VarBuilder::zeros(DType::F32, &device);
        let encoder = DistilBertEncoder::new(&config, vb).unwrap();

        let ids = Tensor::new(&[[4u32, 8, 15, 16, 23, 42]], &device).unwrap();
        let hidden = encoder.forward(&ids).unwrap();
        assert_eq!(hidden.dims3().unwrap(), (1, 6, 16));
    }
}
