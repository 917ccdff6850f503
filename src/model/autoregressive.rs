//! Autoregressive encoder-decoder Transformer.
//!
//! Training runs teacher-forced over the full target; generation encodes the
//! source once, then decodes one symbol at a time under a growing causal mask
//! until every sequence in the batch has emitted the end symbol or `max_len`
//! steps have been taken.

use candle_core::{Module, Tensor, D};
use candle_nn::VarBuilder;

use super::layers::{Decoder, Encoder};
use super::mask::{causal_mask, padding_mask};
use super::positional::PositionalEncoding;
use super::{read_step, Generated};
use crate::config::Config;
use crate::{Error, Result};

pub struct AutoregressiveTransformer {
    src_embedding: candle_nn::Embedding,
    pos_encoder: PositionalEncoding,
    tgt_embedding: candle_nn::Embedding,
    pos_decoder: PositionalEncoding,
    encoder: Encoder,
    decoder: Decoder,
    fc_out: candle_nn::Linear,
    end_index: u32,
    step: u64,
    training: bool,
}

impl AutoregressiveTransformer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        encoder_vocab_size: usize,
        decoder_vocab_size: usize,
        end_index: u32,
        d_model: usize,
        d_fft: usize,
        encoder_layers: usize,
        decoder_layers: usize,
        dropout: f32,
        heads: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let src_embedding = candle_nn::embedding(encoder_vocab_size, d_model, vb.pp("encoder"))?;
        let pos_encoder = PositionalEncoding::new(d_model, dropout, vb.pp("pos_encoder"))?;
        let tgt_embedding = candle_nn::embedding(decoder_vocab_size, d_model, vb.pp("decoder"))?;
        let pos_decoder = PositionalEncoding::new(d_model, dropout, vb.pp("pos_decoder"))?;
        let encoder = Encoder::new(
            d_model,
            heads,
            d_fft,
            dropout,
            encoder_layers,
            vb.pp("transformer.encoder"),
        )?;
        let decoder = Decoder::new(
            d_model,
            heads,
            d_fft,
            dropout,
            decoder_layers,
            vb.pp("transformer.decoder"),
        )?;
        let fc_out = candle_nn::linear(d_model, decoder_vocab_size, vb.pp("fc_out"))?;
        let step = read_step(&vb)?;
        Ok(Self {
            src_embedding,
            pos_encoder,
            tgt_embedding,
            pos_decoder,
            encoder,
            decoder,
            fc_out,
            end_index,
            step,
            training: false,
        })
    }

    pub fn from_config(config: &Config, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.encoder_vocab_size,
            config.decoder_vocab_size,
            config.end_index,
            config.model.d_model,
            config.model.d_fft,
            config.model.layers,
            config.model.layers,
            config.model.dropout,
            config.model.heads,
            vb,
        )
    }

    /// Teacher-forced forward pass: `src` `[B, T_s]`, `trg` `[B, T_t]` →
    /// logits `[B, T_t, V]`.
    ///
    /// Increments the step counter when in training mode.
    pub fn forward(&mut self, src: &Tensor, trg: &Tensor) -> Result<Tensor> {
        if self.training {
            self.step += 1;
        }
        let src_pad_mask = padding_mask(src)?;
        let trg_pad_mask = padding_mask(trg)?;
        let trg_mask = causal_mask(trg.dim(1)?, trg.device())?;

        let memory = self.encode(src, &src_pad_mask, self.training)?;
        let h = self.tgt_embedding.forward(trg)?;
        let h = self.pos_decoder.forward(&h, self.training)?;
        let out = self.decoder.forward(
            &h,
            &memory,
            Some(&trg_mask),
            Some(&trg_pad_mask),
            Some(&src_pad_mask),
            self.training,
        )?;
        Ok(self.fc_out.forward(&out)?)
    }

    fn encode(&self, src: &Tensor, src_pad_mask: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.src_embedding.forward(src)?;
        let h = self.pos_encoder.forward(&h, train)?;
        self.encoder.forward(&h, Some(src_pad_mask), train)
    }

    /// Batched greedy decoding.
    ///
    /// - `input`: `[B, T]` padded source ids
    /// - `start_index`: `[B]` start symbol per sample
    /// - `max_len`: decode-step bound; reaching it without universal end-symbol
    ///   emission returns the truncated sequence without error
    ///
    /// Returns tokens `[B, L]` (including the leading start symbol, `L <=
    /// max_len + 1`) and same-shaped confidences. The first position's
    /// confidence is fixed at 1.0; the confidence of position `j + 1` is the
    /// maximum softmax probability of the distribution at position `j`, the
    /// same shift the training target uses.
    pub fn generate(
        &self,
        input: &Tensor,
        start_index: &Tensor,
        max_len: usize,
    ) -> Result<Generated> {
        let (batch, _frames) = input.dims2()?;
        if start_index.dims1()? != batch {
            return Err(Error::Shape(format!(
                "{} start ids for a batch of {batch}",
                start_index.dims1()?
            )));
        }

        let src_pad_mask = padding_mask(input)?;
        // Encode once; every decode step reads the same cached memory.
        let memory = self.encode(input, &src_pad_mask, false)?;

        let start_vec: Vec<u32> = start_index.to_vec1()?;
        let mut finished: Vec<bool> = start_vec.iter().map(|&s| s == self.end_index).collect();

        let mut out_indices = start_index.unsqueeze(1)?; // [B, 1]
        let mut step_probs: Vec<Tensor> = Vec::with_capacity(max_len);
        let mut steps_taken = 0usize;

        for i in 0..max_len {
            let tgt_mask = causal_mask(i + 1, input.device())?;
            let h = self.tgt_embedding.forward(&out_indices)?;
            let h = self.pos_decoder.forward(&h, false)?;
            // The decoder input grows one real token per step and is never
            // padded mid-generation, so no target key-padding mask.
            let h = self.decoder.forward(
                &h,
                &memory,
                Some(&tgt_mask),
                None,
                Some(&src_pad_mask),
                false,
            )?;
            let probs = candle_nn::ops::softmax_last_dim(&self.fc_out.forward(&h)?)?;
            let last = probs.narrow(1, i, 1)?; // [B, 1, V] — newest position only
            let next = last.argmax(D::Minus1)?; // [B, 1]

            step_probs.push(last);
            // Finished samples keep being fed their own end symbol; harmless,
            // and it keeps the batch rectangular.
            out_indices = Tensor::cat(&[&out_indices, &next], 1)?;

            let next_vec: Vec<u32> = next.squeeze(1)?.to_vec1()?;
            for (b, &tok) in next_vec.iter().enumerate() {
                if tok == self.end_index {
                    finished[b] = true;
                }
            }
            steps_taken = i + 1;
            if finished.iter().all(|&f| f) {
                break;
            }
        }
        tracing::debug!(
            steps = steps_taken,
            max_len,
            truncated = !finished.iter().all(|&f| f),
            "autoregressive decode done"
        );

        let total = out_indices.dim(1)?;
        let mut prob_data = vec![1f32; batch * total];
        for (j, step) in step_probs.iter().enumerate() {
            let max_p: Vec<f32> = step.max(D::Minus1)?.squeeze(1)?.to_vec1()?;
            for (b, &p) in max_p.iter().enumerate() {
                prob_data[b * total + j + 1] = p;
            }
        }
        let probs = Tensor::from_vec(prob_data, (batch, total), input.device())?;
        Ok(Generated {
            tokens: out_indices,
            probs,
        })
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

    fn model(end_index: u32, vb: VarBuilder) -> AutoregressiveTransformer {
        AutoregressiveTransformer::new(30, 40, end_index, 16, 32, 2, 2, 0.0, 2, vb).unwrap()
    }

    #[test]
    fn generate_shape_and_confidence_bounds() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let m = model(2, vb);

        // Two samples of real lengths 5 and 3, padded to 5.
        let input = Tensor::new(&[[3u32, 4, 5, 6, 7], [8, 9, 10, 0, 0]], &dev).unwrap();
        let start = Tensor::new(&[1u32, 1], &dev).unwrap();
        let out = m.generate(&input, &start, 10).unwrap();

        let tokens: Vec<Vec<u32>> = out.tokens.to_vec2().unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0].len() <= 11);
        assert_eq!(tokens[0][0], 1); // leading start symbol preserved
        assert_eq!(out.probs.dims(), out.tokens.dims());

        let probs: Vec<Vec<f32>> = out.probs.to_vec2().unwrap();
        for row in &probs {
            assert_eq!(row[0], 1.0);
            for &p in row {
                assert!((0.0..=1.0).contains(&p), "{p}");
            }
        }
    }

    #[test]
    fn runs_full_max_len_when_end_never_emitted() {
        let dev = Device::Cpu;
        // Zero weights: every logit row is uniform, arg-max is symbol 0,
        // so end symbol 2 is never produced.
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let m = model(2, vb);
        let input = Tensor::new(&[[3u32, 4, 5]], &dev).unwrap();
        let start = Tensor::new(&[1u32], &dev).unwrap();
        let out = m.generate(&input, &start, 7).unwrap();
        assert_eq!(out.tokens.dims(), &[1, 8]); // start + 7 truncated steps
    }

    #[test]
    fn stops_as_soon_as_every_row_has_ended() {
        let dev = Device::Cpu;
        // With end_index 0, the uniform arg-max (symbol 0) ends each row on
        // the first step.
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let m = model(0, vb);
        let input = Tensor::new(&[[3u32, 4], [5, 6]], &dev).unwrap();
        let start = Tensor::new(&[1u32, 1], &dev).unwrap();
        let out = m.generate(&input, &start, 10).unwrap();
        assert_eq!(out.tokens.dims(), &[2, 2]);
    }

    #[test]
    fn decoder_output_causally_masked() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mut m = model(2, vb);

        let src = Tensor::new(&[[3u32, 4, 5]], &dev).unwrap();
        let trg_a = Tensor::new(&[[1u32, 7, 8, 9]], &dev).unwrap();
        let trg_b = Tensor::new(&[[1u32, 7, 15, 20]], &dev).unwrap(); // differs from position 2 on

        let out_a = m.forward(&src, &trg_a).unwrap();
        let out_b = m.forward(&src, &trg_b).unwrap();

        let a: Vec<f32> = out_a.narrow(1, 0, 2).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = out_b.narrow(1, 0, 2).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-5, "{x} vs {y}");
        }
    }

    #[test]
    fn mismatched_start_batch_fails_loudly() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let m = model(2, vb);
        let input = Tensor::new(&[[3u32, 4], [5, 6]], &dev).unwrap();
        let start = Tensor::new(&[1u32], &dev).unwrap();
        assert!(m.generate(&input, &start, 5).is_err());
    }

    #[test]
    fn training_forward_increments_step() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mut m = model(2, vb);
        let src = Tensor::new(&[[3u32, 4]], &dev).unwrap();
        let trg = Tensor::new(&[[1u32, 5]], &dev).unwrap();
        let initial = m.step();
        m.forward(&src, &trg).unwrap();
        assert_eq!(m.step(), initial);
        m.set_train(true);
        m.forward(&src, &trg).unwrap();
        assert_eq!(m.step(), initial + 1);
    }
}
