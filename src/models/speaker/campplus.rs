//! CAMPPlus speaker encoder
//!
//! Extracts speaker identity features from audio

use anyhow::Result;
use candle_core::{Device, Tensor, DType};

/// CAMPPlus speaker encoder
/// Produces a 192-dimensional speaker embedding
pub struct CAMPPlus {
    device: Device,
    embedding_size: usize,
    // TODO: Add TDNN layers
}

impl CAMPPlus {
    /// Create a new CAMPPlus encoder
    pub fn new(embedding_size: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            device: device.clone(),
            embedding_size,
        })
    }
    
    /// Load from checkpoint
    pub fn load(path: &str, device: &Device) -> Result<Self> {
        // TODO: Load weights
        Self::new(192, device)
    }
    
    /// Extract speaker embedding from mel filterbank features
    pub fn encode(&self, fbank: &Tensor) -> Result<Tensor> {
        // Input: (batch, time, 80) fbank features
        // Output: (batch, 192) speaker embedding
        
        let batch_size = fbank.dim(0)?;
        
        // TODO: Implement TDNN forward pass
        Tensor::zeros((batch_size, self.embedding_size), DType::F32, &self.device)
            .map_err(Into::into)
    }
}
