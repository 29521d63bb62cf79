//! ALBERT encoder
//!
//! BERT with two parameter reductions: factorized embeddings (narrow
//! embedding table projected up to the hidden width) and a single shared
//! layer applied `num_hidden_layers` times. Tensor names follow upstream
//! checkpoints (`encoder.embedding_hidden_mapping_in`,
//! `encoder.albert_layer_groups.0.albert_layers.0...`).

use anyhow::{bail, Result};
use candle_core::{Tensor, D};
use candle_nn::{embedding, layer_norm, linear, ops, Embedding, LayerNorm, Linear, Module, VarBuilder};

use super::EncoderConfig;

struct AlbertEmbeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    layer_norm: LayerNorm,
}

impl AlbertEmbeddings {
    fn new(config: &EncoderConfig, embedding_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            word: embedding(config.vocab_size, embedding_size, vb.pp("word_embeddings"))?,
            position: embedding(
                config.max_position_embeddings,
                embedding_size,
                vb.pp("position_embeddings"),
            )?,
            token_type: embedding(config.type_vocab_size, embedding_size, vb.pp("token_type_embeddings"))?,
            layer_norm: layer_norm(embedding_size, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, ids.device())?.unsqueeze(0)?;

        let hidden = self.word.forward(ids)?;
        let hidden = hidden.broadcast_add(&self.position.forward(&positions)?)?;
        let hidden = hidden.broadcast_add(&self.token_type.forward(&ids.zeros_like()?)?)?;
        self.layer_norm.forward(&hidden).map_err(Into::into)
    }
}

/// The one shared transformer block.
struct AlbertLayer {
    query: Linear,
    key: Linear,
    value: Linear,
    attn_output: Linear,
    attn_layer_norm: LayerNorm,
    ffn: Linear,
    ffn_output: Linear,
    full_layer_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl AlbertLayer {
    fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.hidden_size;
        let num_heads = config.num_attention_heads;
        if dim % num_heads != 0 {
            bail!("hidden size {} not divisible by {} heads", dim, num_heads);
        }

        Ok(Self {
            query: linear(dim, dim, vb.pp("attention.query"))?,
            key: linear(dim, dim, vb.pp("attention.key"))?,
            value: linear(dim, dim, vb.pp("attention.value"))?,
            attn_output: linear(dim, dim, vb.pp("attention.dense"))?,
            attn_layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("attention.LayerNorm"))?,
            ffn: linear(dim, config.intermediate_size, vb.pp("ffn"))?,
            ffn_output: linear(config.intermediate_size, dim, vb.pp("ffn_output"))?,
            full_layer_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("full_layer_layer_norm"))?,
            num_heads,
            head_dim: dim / num_heads,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = x.dims3()?;

        let q = self
            .query
            .forward(x)?
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .key
            .forward(x)?
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .value
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
        let attn_out = self.attn_output.forward(&attn_out)?;

        let x = self.attn_layer_norm.forward(&(x + attn_out)?)?;

        let ffn = self.ffn.forward(&x)?.gelu_erf()?;
        let ffn = self.ffn_output.forward(&ffn)?;
        self.full_layer_norm.forward(&(x + ffn)?).map_err(Into::into)
    }
}

/// ALBERT encoder: factorized embeddings, shared layer repeated N times.
pub struct AlbertEncoder {
    embeddings: AlbertEmbeddings,
    embedding_projection: Linear,
    shared_layer: AlbertLayer,
    num_hidden_layers: usize,
    hidden_size: usize,
}

impl AlbertEncoder {
    /// Build the encoder from weights rooted at `vb`.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let embedding_size = config.embedding_size.unwrap_or(config.hidden_size);
        let embeddings = AlbertEmbeddings::new(config, embedding_size, vb.pp("embeddings"))?;
        let embedding_projection = linear(
            embedding_size,
            config.hidden_size,
            vb.pp("encoder.embedding_hidden_mapping_in"),
        )?;
        let shared_layer = AlbertLayer::new(
            config,
            vb.pp("encoder.albert_layer_groups.0.albert_layers.0"),
        )?;
        Ok(Self {
            embeddings,
            embedding_projection,
            shared_layer,
            num_hidden_layers: config.num_hidden_layers,
            hidden_size: config.hidden_size,
        })
    }

    /// Final hidden states for token ids of shape `(batch, seq)`.
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let hidden = self.embeddings.forward(ids)?;
        let mut hidden = self.embedding_projection.forward(&hidden)?;
        for _ in 0..self.num_hidden_layers {
            hidden = self.shared_layer.forward(&hidden)?;
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
    fn test_forward_projects_factorized_embeddings() {
        let device = Device::Cpu;
        let config: EncoderConfig = serde_json::from_str(
            r#"{
                "model_type": "albert",
                "vocab_size": 32,
                "hidden_size": 16,
                "num_hidden_layers": 3,
                "num_attention_heads": 4,
                "intermediate_size": 32,
                "max_position_embeddings": 64,
                "embedding_size": 8
            }"#,
        )
        .unwrap();

        let vb = VarBuilder::zeros(DType::F32, &device);
        let encoder = AlbertEncoder::new(&config, vb).unwrap();

        let ids = Tensor::new(&[[3u32, 7, 1, 0, 2]], &device).unwrap();
        let hidden = encoder.forward(&ids).unwrap();
        assert_eq!(hidden.dims3().unwrap(), (1, 5, 16));
    }
}
