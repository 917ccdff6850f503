//! Encoder-only Transformer, non-autoregressive.
//!
//! Maps a padded id batch `[B, T]` straight to logits `[B, T, V]` in one
//! forward pass — one output frame per input frame, so the dedup decoder can
//! collapse repeats downstream.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::decoding::get_dedup_tokens;
use super::layers::Encoder;
use super::mask::padding_mask;
use super::positional::PositionalEncoding;
use super::{read_step, Generated};
use crate::config::Config;
use crate::Result;

pub struct ForwardTransformer {
    embedding: candle_nn::Embedding,
    pos_encoder: PositionalEncoding,
    encoder: Encoder,
    fc_out: candle_nn::Linear,
    step: u64,
    training: bool,
}

impl ForwardTransformer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        encoder_vocab_size: usize,
        decoder_vocab_size: usize,
        d_model: usize,
        d_fft: usize,
        layers: usize,
        dropout: f32,
        heads: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = candle_nn::embedding(encoder_vocab_size, d_model, vb.pp("embedding"))?;
        let pos_encoder = PositionalEncoding::new(d_model, dropout, vb.pp("pos_encoder"))?;
        let encoder = Encoder::new(d_model, heads, d_fft, dropout, layers, vb.pp("encoder"))?;
        let fc_out = candle_nn::linear(d_model, decoder_vocab_size, vb.pp("fc_out"))?;
        let step = read_step(&vb)?;
        Ok(Self {
            embedding,
            pos_encoder,
            encoder,
            fc_out,
            step,
            training: false,
        })
    }

    pub fn from_config(config: &Config, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.encoder_vocab_size,
            config.decoder_vocab_size,
            config.model.d_model,
            config.model.d_fft,
            config.model.layers,
            config.model.dropout,
            config.model.heads,
            vb,
        )
    }

    /// `[B, T]` ids → `[B, T, V]` logits.
    ///
    /// Padded positions (id 0) are excluded from attention via the padding
    /// mask. Increments the step counter when in training mode.
    pub fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        if self.training {
            self.step += 1;
        }
        self.forward_impl(x, self.training)
    }

    fn forward_impl(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let pad_mask = padding_mask(x)?;
        let h = self.embedding.forward(x)?;
        let h = self.pos_encoder.forward(&h, train)?;
        let h = self.encoder.forward(&h, Some(&pad_mask), train)?;
        Ok(self.fc_out.forward(&h)?)
    }

    /// Gradient-free forward pass followed by dedup decoding.
    ///
    /// When `x_len` is given, frames beyond each sample's real length are
    /// excluded from the collapse, so extra padding cannot change the output.
    pub fn generate(&self, x: &Tensor, x_len: Option<&[usize]>) -> Result<Generated> {
        let logits = self.forward_impl(x, false)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn model(dev: &Device) -> ForwardTransformer {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, dev);
        ForwardTransformer::new(30, 40, 16, 32, 2, 0.0, 2, vb).unwrap()
    }

    #[test]
    fn output_time_dimension_matches_input() {
        let dev = Device::Cpu;
        let mut m = model(&dev);
        let x = Tensor::new(&[[3u32, 4, 5, 0, 0], [6, 7, 8, 9, 10]], &dev).unwrap();
        let logits = m.forward(&x).unwrap();
        assert_eq!(logits.dims(), &[2, 5, 40]);
    }

    #[test]
    fn real_positions_unaffected_by_extra_padding() {
        let dev = Device::Cpu;
        let mut m = model(&dev);
        let short = Tensor::new(&[[3u32, 4, 5]], &dev).unwrap();
        let long = Tensor::new(&[[3u32, 4, 5, 0, 0]], &dev).unwrap();
        let a = m.forward(&short).unwrap();
        let b = m.forward(&long).unwrap().narrow(1, 0, 3).unwrap();
        let av: Vec<f32> = a.flatten_all().unwrap().to_vec1().unwrap();
        let bv: Vec<f32> = b.flatten_all().unwrap().to_vec1().unwrap();
        for (x, y) in av.iter().zip(&bv) {
            assert!((x - y).abs() < 1e-4, "{x} vs {y}");
        }
    }

    #[test]
    fn generate_is_padding_invariant() {
        let dev = Device::Cpu;
        let m = model(&dev);
        let short = Tensor::new(&[[3u32, 4, 5]], &dev).unwrap();
        let long = Tensor::new(&[[3u32, 4, 5, 0, 0, 0]], &dev).unwrap();
        let a = m.generate(&short, Some(&[3])).unwrap();
        let b = m.generate(&long, Some(&[3])).unwrap();
        assert_eq!(
            a.tokens.to_vec2::<u32>().unwrap(),
            b.tokens.to_vec2::<u32>().unwrap()
        );
        for row in a.probs.to_vec2::<f32>().unwrap() {
            for p in row {
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }
}
