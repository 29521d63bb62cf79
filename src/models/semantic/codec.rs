//! Semantic codec for vector quantization
//!
//! Quantizes semantic embeddings to discrete codes

use anyhow::Result;
use candle_core::{Device, Tensor, DType};

/// Semantic codec with vector quantization
pub struct SemanticCodec {
    device: Device,
    codebook_size: usize,
    codebook_dim: usize,
    // TODO: Add codebook embeddings and other components
}

impl SemanticCodec {
    /// Create a new semantic codec
    pub fn new(codebook_size: usize, codebook_dim: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            device: device.clone(),
            codebook_size,
            codebook_dim,
        })
    }
    
    /// Load codec weights from safetensors
    pub fn load(path: &str, device: &Device) -> Result<Self> {
        // TODO: Load from safetensors
        Self::new(8192, 8, device)
    }
    
    /// Quantize embeddings to codes
    pub fn quantize(&self, embeddings: &Tensor) -> Result<(Tensor, Tensor)> {
        // TODO: Implement VQ quantization
        let batch_size = embeddings.dim(0)?;
        let seq_len = embeddings.dim(1)?;
        
        let quantized = embeddings.clone();
        let codes = Tensor::zeros((batch_size, seq_len), DType::I64, &self.device)?;
        
        Ok((quantized, codes))
    }
    
    /// Convert codes back to embeddings
    pub fn vq2emb(&self, codes: &Tensor) -> Result<Tensor> {
        // TODO: Lookup embeddings from codebook
        let batch_size = codes.dim(0)?;
        let seq_len = codes.dim(1)?;
        
        Tensor::zeros((batch_size, seq_len, self.codebook_dim), DType::F32, &self.device)
            .map_err(Into::into)
    }
}
