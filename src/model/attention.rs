//! Scaled dot-product multi-head attention.
//!
//! One implementation serves both self-attention (queries, keys and values
//! from the same sequence) and cross-attention (keys/values from the cached
//! encoder memory). Takes an optional square attention mask (causal) and an
//! optional key-padding mask, both boolean with `1` = blocked.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use crate::{Error, Result};

pub struct MultiHeadAttention {
    to_q: candle_nn::Linear,
    to_k: candle_nn::Linear,
    to_v: candle_nn::Linear,
    to_out: candle_nn::Linear,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(d_model: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || d_model % num_heads != 0 {
            return Err(Error::Shape(format!(
                "d_model {d_model} not divisible by heads {num_heads}"
            )));
        }
        let to_q = candle_nn::linear(d_model, d_model, vb.pp("to_q"))?;
        let to_k = candle_nn::linear(d_model, d_model, vb.pp("to_k"))?;
        let to_v = candle_nn::linear(d_model, d_model, vb.pp("to_v"))?;
        let to_out = candle_nn::linear(d_model, d_model, vb.pp("to_out"))?;
        Ok(Self {
            to_q,
            to_k,
            to_v,
            to_out,
            num_heads,
            head_dim: d_model / num_heads,
        })
    }

    /// Forward pass.
    ///
    /// - `query`: `[B, T_q, D]`
    /// - `kv`: `[B, T_k, D]` — same tensor as `query` for self-attention
    /// - `attn_mask`: `[T_q, T_k]` boolean, `1` = position blocked
    /// - `key_padding_mask`: `[B, T_k]` boolean, `1` = padded key
    ///
    /// Returns `[B, T_q, D]`.
    pub fn forward(
        &self,
        query: &Tensor,
        kv: &Tensor,
        attn_mask: Option<&Tensor>,
        key_padding_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (batch, t_q, _) = query.dims3()?;
        let (_, t_k, _) = kv.dims3()?;

        // Project and reshape to [B, H, T, D_head]
        let q = self
            .to_q
            .forward(query)?
            .reshape((batch, t_q, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .to_k
            .forward(kv)?
            .reshape((batch, t_k, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .to_v
            .forward(kv)?
            .reshape((batch, t_k, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;

        let scale = (self.head_dim as f64).sqrt();
        let mut scores = (q.contiguous()?.matmul(&k.transpose(2, 3)?.contiguous()?)? / scale)?;

        if let Some(mask) = attn_mask {
            // [T_q, T_k] → [1, 1, T_q, T_k]
            let mask = mask.unsqueeze(0)?.unsqueeze(0)?.broadcast_as(scores.shape())?;
            scores = masked_fill(&scores, &mask)?;
        }
        if let Some(mask) = key_padding_mask {
            // [B, T_k] → [B, 1, 1, T_k]
            let mask = mask.unsqueeze(1)?.unsqueeze(2)?.broadcast_as(scores.shape())?;
            scores = masked_fill(&scores, &mask)?;
        }

        let attn = candle_nn::ops::softmax_last_dim(&scores)?;
        let out = attn.matmul(&v.contiguous()?)?; // [B, H, T_q, D_head]
        let out = out
            .transpose(1, 2)?
            .reshape((batch, t_q, self.num_heads * self.head_dim))?;
        Ok(self.to_out.forward(&out)?)
    }
}

/// Replace blocked score positions (mask == 1) with the dtype minimum.
fn masked_fill(scores: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
    let fill = (scores.zeros_like()? + f64::from(f32::MIN))?;
    mask.contiguous()?.where_cond(&fill, scores)
}
