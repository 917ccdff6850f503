//! Transformer encoder/decoder layers and stacks.
//!
//! Post-norm layers with a ReLU feed-forward block, matching the layout the
//! original models were trained with. Both stacks end in a final LayerNorm.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::attention::MultiHeadAttention;
use crate::Result;

const LAYER_NORM_EPS: f64 = 1e-5;

/// Self-attention + feed-forward encoder layer (post-norm).
pub struct EncoderLayer {
    self_attn: MultiHeadAttention,
    linear1: candle_nn::Linear,
    linear2: candle_nn::Linear,
    norm1: candle_nn::LayerNorm,
    norm2: candle_nn::LayerNorm,
    dropout: candle_nn::Dropout,
}

impl EncoderLayer {
    pub fn new(
        d_model: usize,
        heads: usize,
        d_fft: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            self_attn: MultiHeadAttention::new(d_model, heads, vb.pp("self_attn"))?,
            linear1: candle_nn::linear(d_model, d_fft, vb.pp("linear1"))?,
            linear2: candle_nn::linear(d_fft, d_model, vb.pp("linear2"))?,
            norm1: candle_nn::layer_norm(d_model, LAYER_NORM_EPS, vb.pp("norm1"))?,
            norm2: candle_nn::layer_norm(d_model, LAYER_NORM_EPS, vb.pp("norm2"))?,
            dropout: candle_nn::Dropout::new(dropout),
        })
    }

    /// - `x`: `[B, T, D]`
    /// - `key_padding_mask`: `[B, T]` boolean, `1` = padded
    pub fn forward(&self, x: &Tensor, key_padding_mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let attn = self.self_attn.forward(x, x, None, key_padding_mask)?;
        let x = self.norm1.forward(&(x + self.dropout.forward(&attn, train)?)?)?;

        let ff = self.linear1.forward(&x)?.relu()?;
        let ff = self.linear2.forward(&self.dropout.forward(&ff, train)?)?;
        Ok(self.norm2.forward(&(&x + self.dropout.forward(&ff, train)?)?)?)
    }
}

/// Stack of encoder layers with a final normalization.
pub struct Encoder {
    layers: Vec<EncoderLayer>,
    norm: candle_nn::LayerNorm,
}

impl Encoder {
    pub fn new(
        d_model: usize,
        heads: usize,
        d_fft: usize,
        dropout: f32,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            layers.push(EncoderLayer::new(
                d_model,
                heads,
                d_fft,
                dropout,
                vb.pp(format!("layers.{i}")),
            )?);
        }
        let norm = candle_nn::layer_norm(d_model, LAYER_NORM_EPS, vb.pp("norm"))?;
        Ok(Self { layers, norm })
    }

    pub fn forward(&self, x: &Tensor, key_padding_mask: Option<&Tensor>, train: bool) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward(&h, key_padding_mask, train)?;
        }
        Ok(self.norm.forward(&h)?)
    }
}

/// Causal self-attention + cross-attention + feed-forward decoder layer.
pub struct DecoderLayer {
    self_attn: MultiHeadAttention,
    cross_attn: MultiHeadAttention,
    linear1: candle_nn::Linear,
    linear2: candle_nn::Linear,
    norm1: candle_nn::LayerNorm,
    norm2: candle_nn::LayerNorm,
    norm3: candle_nn::LayerNorm,
    dropout: candle_nn::Dropout,
}

impl DecoderLayer {
    pub fn new(
        d_model: usize,
        heads: usize,
        d_fft: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            self_attn: MultiHeadAttention::new(d_model, heads, vb.pp("self_attn"))?,
            cross_attn: MultiHeadAttention::new(d_model, heads, vb.pp("cross_attn"))?,
            linear1: candle_nn::linear(d_model, d_fft, vb.pp("linear1"))?,
            linear2: candle_nn::linear(d_fft, d_model, vb.pp("linear2"))?,
            norm1: candle_nn::layer_norm(d_model, LAYER_NORM_EPS, vb.pp("norm1"))?,
            norm2: candle_nn::layer_norm(d_model, LAYER_NORM_EPS, vb.pp("norm2"))?,
            norm3: candle_nn::layer_norm(d_model, LAYER_NORM_EPS, vb.pp("norm3"))?,
            dropout: candle_nn::Dropout::new(dropout),
        })
    }

    /// - `tgt`: `[B, T_t, D]` — growing decoder input
    /// - `memory`: `[B, T_s, D]` — cached encoder output
    /// - `tgt_mask`: `[T_t, T_t]` causal mask for self-attention
    /// - `tgt_key_padding_mask`: `[B, T_t]` — only set on the teacher-forced path
    /// - `memory_key_padding_mask`: `[B, T_s]` — source padding for cross-attention
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        tgt: &Tensor,
        memory: &Tensor,
        tgt_mask: Option<&Tensor>,
        tgt_key_padding_mask: Option<&Tensor>,
        memory_key_padding_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let attn = self
            .self_attn
            .forward(tgt, tgt, tgt_mask, tgt_key_padding_mask)?;
        let x = self.norm1.forward(&(tgt + self.dropout.forward(&attn, train)?)?)?;

        let cross = self
            .cross_attn
            .forward(&x, memory, None, memory_key_padding_mask)?;
        let x = self.norm2.forward(&(&x + self.dropout.forward(&cross, train)?)?)?;

        let ff = self.linear1.forward(&x)?.relu()?;
        let ff = self.linear2.forward(&self.dropout.forward(&ff, train)?)?;
        Ok(self.norm3.forward(&(&x + self.dropout.forward(&ff, train)?)?)?)
    }
}

/// Stack of decoder layers with a final normalization.
pub struct Decoder {
    layers: Vec<DecoderLayer>,
    norm: candle_nn::LayerNorm,
}

impl Decoder {
    pub fn new(
        d_model: usize,
        heads: usize,
        d_fft: usize,
        dropout: f32,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            layers.push(DecoderLayer::new(
                d_model,
                heads,
                d_fft,
                dropout,
                vb.pp(format!("layers.{i}")),
            )?);
        }
        let norm = candle_nn::layer_norm(d_model, LAYER_NORM_EPS, vb.pp("norm"))?;
        Ok(Self { layers, norm })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        tgt: &Tensor,
        memory: &Tensor,
        tgt_mask: Option<&Tensor>,
        tgt_key_padding_mask: Option<&Tensor>,
        memory_key_padding_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let mut h = tgt.clone();
        for layer in &self.layers {
            h = layer.forward(
                &h,
                memory,
                tgt_mask,
                tgt_key_padding_mask,
                memory_key_padding_mask,
                train,
            )?;
        }
        Ok(self.norm.forward(&h)?)
    }
}
