//! Bidirectional LSTM model, non-autoregressive.
//!
//! Embeds input ids, runs a stack of bidirectional LSTM layers (layer i > 0
//! consumes the 2×hidden concatenation of the previous layer) and projects to
//! output-vocabulary logits, one frame per input frame.

use candle_core::{Module, Tensor};
use candle_nn::{VarBuilder, RNN};

use super::decoding::get_dedup_tokens;
use super::{read_step, Generated};
use crate::config::Config;
use crate::Result;

/// One bidirectional LSTM layer.
///
/// Candle's LSTM is unidirectional, so the backward direction runs over the
/// input reversed within each sample's real length; its output is reversed
/// back before concatenation. This replaces the pack/unpack dance around
/// variable-length batches.
struct BiLstm {
    fwd: candle_nn::LSTM,
    bwd: candle_nn::LSTM,
}

impl BiLstm {
    fn new(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fwd: candle_nn::lstm(
                in_dim,
                hidden_dim,
                candle_nn::LSTMConfig::default(),
                vb.pp("forward"),
            )?,
            bwd: candle_nn::lstm(
                in_dim,
                hidden_dim,
                candle_nn::LSTMConfig::default(),
                vb.pp("backward"),
            )?,
        })
    }

    /// `[B, T, in]` → `[B, T, 2*hidden]`
    fn forward(&self, x: &Tensor, lengths: Option<&[usize]>) -> Result<Tensor> {
        let states = self.fwd.seq(x)?;
        let fwd = self.fwd.states_to_tensor(&states)?;

        let reversed = reverse_padded(x, lengths)?;
        let states = self.bwd.seq(&reversed)?;
        let bwd = reverse_padded(&self.bwd.states_to_tensor(&states)?, lengths)?;

        Ok(Tensor::cat(&[&fwd, &bwd], 2)?)
    }
}

/// Reverse the time axis of `[B, T, D]` per sample, within each sample's real
/// length; padded tail frames stay in place.
fn reverse_padded(x: &Tensor, lengths: Option<&[usize]>) -> Result<Tensor> {
    let (batch, frames, _d) = x.dims3()?;
    let mut rows = Vec::with_capacity(batch);
    for i in 0..batch {
        let len = lengths.map_or(frames, |lens| lens[i]);
        let mut idx: Vec<u32> = (0..len as u32).rev().collect();
        idx.extend(len as u32..frames as u32);
        let idx = Tensor::from_vec(idx, (frames,), x.device())?;
        rows.push(x.narrow(0, i, 1)?.index_select(&idx, 1)?);
    }
    Ok(Tensor::cat(&rows, 0)?)
}

/// Bidirectional LSTM grapheme-to-phoneme model.
pub struct LstmModel {
    embedding: candle_nn::Embedding,
    lstms: Vec<BiLstm>,
    lin: candle_nn::Linear,
    step: u64,
    training: bool,
}

impl LstmModel {
    pub fn new(
        num_symbols_in: usize,
        num_symbols_out: usize,
        lstm_dim: usize,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = candle_nn::embedding(num_symbols_in, lstm_dim, vb.pp("embedding"))?;
        let mut lstms = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let in_dim = if i == 0 { lstm_dim } else { 2 * lstm_dim };
            lstms.push(BiLstm::new(in_dim, lstm_dim, vb.pp(format!("lstm.{i}")))?);
        }
        let lin = candle_nn::linear(2 * lstm_dim, num_symbols_out, vb.pp("lin"))?;
        let step = read_step(&vb)?;
        Ok(Self {
            embedding,
            lstms,
            lin,
            step,
            training: false,
        })
    }

    pub fn from_config(config: &Config, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.encoder_vocab_size,
            config.decoder_vocab_size,
            config.model.lstm_dim,
            config.model.num_layers,
            vb,
        )
    }

    /// Teacher-forced/training forward pass: `[B, T]` ids → `[B, T, V]` logits.
    ///
    /// Increments the step counter when in training mode.
    pub fn forward(&mut self, x: &Tensor, x_len: Option<&[usize]>) -> Result<Tensor> {
        if self.training {
            self.step += 1;
        }
        self.forward_impl(x, x_len)
    }

    fn forward_impl(&self, x: &Tensor, x_len: Option<&[usize]>) -> Result<Tensor> {
        let mut h = self.embedding.forward(x)?;
        for lstm in &self.lstms {
            h = lstm.forward(&h, x_len)?;
        }
        if let Some(lens) = x_len {
            // Zero padded frames, as unpacking a packed sequence would.
            h = h.broadcast_mul(&frame_mask(lens, h.dim(1)?, &h)?)?;
        }
        Ok(self.lin.forward(&h)?)
    }

    /// Gradient-free forward pass followed by dedup decoding.
    pub fn generate(&self, x: &Tensor, x_len: Option<&[usize]>) -> Result<Generated> {
        let logits = self.forward_impl(x, x_len)?;
        let (tokens, probs) = get_dedup_tokens(&logits, x_len)?;
        Ok(Generated { tokens, probs })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn set_train(&mut self, train: bool) {
        self.training = train;
    }
}

/// `[B, T, 1]` float mask, 1.0 for frames inside each sample's length.
fn frame_mask(lengths: &[usize], frames: usize, like: &Tensor) -> Result<Tensor> {
    let mut data = vec![0f32; lengths.len() * frames];
    for (i, &len) in lengths.iter().enumerate() {
        for t in 0..len.min(frames) {
            data[i * frames + t] = 1.0;
        }
    }
    Ok(Tensor::from_vec(data, (lengths.len(), frames, 1), like.device())?
        .to_dtype(like.dtype())?)
}
