//! CTC-style dedup decoding of frame-level logits.
//!
//! Collapses a `[B, T, V]` logit batch into per-sample symbol sequences:
//! softmax per frame, arg-max symbol, drop blanks (id 0) first, then merge
//! consecutive runs of the remaining symbols, so a run may span dropped
//! blank frames. A run's confidence is the maximum per-frame probability
//! seen inside the run. The collapse itself is a single host-side
//! pass per row, kept independent of the tensor library so its semantics are
//! exact and testable in isolation.

use candle_core::{DType, Tensor};

use crate::{Error, Result};

/// Deduplicated tokens and their probabilities.
///
/// Both tensors are `[B, L]` where `L` is the longest collapsed sequence in
/// the batch; shorter rows are right-padded with symbol 0 / probability 0.
pub fn get_dedup_tokens(
    logits: &Tensor,
    lengths: Option<&[usize]>,
) -> Result<(Tensor, Tensor)> {
    let (batch, frames, vocab) = logits.dims3()?;
    if batch == 0 || frames == 0 || vocab == 0 {
        return Err(Error::Shape(format!(
            "dedup decoding needs non-empty batch, frames and vocabulary, got B={batch} T={frames} V={vocab}"
        )));
    }
    if let Some(lens) = lengths {
        if lens.len() != batch {
            return Err(Error::Shape(format!(
                "{} lengths for a batch of {batch}",
                lens.len()
            )));
        }
        if let Some(&bad) = lens.iter().find(|&&l| l > frames) {
            return Err(Error::Shape(format!(
                "sample length {bad} exceeds padded size {frames}"
            )));
        }
    }

    let probs = candle_nn::ops::softmax_last_dim(&logits.to_dtype(DType::F32)?)?;
    let rows: Vec<Vec<Vec<f32>>> = probs.to_vec3()?;

    let mut out_tokens: Vec<Vec<u32>> = Vec::with_capacity(batch);
    let mut out_probs: Vec<Vec<f32>> = Vec::with_capacity(batch);
    for (i, row) in rows.iter().enumerate() {
        let valid = lengths.map_or(frames, |lens| lens[i]);
        let (tokens, probs) = collapse_row(&row[..valid]);
        out_tokens.push(tokens);
        out_probs.push(probs);
    }

    // Right-pad every row to the batch's longest collapsed sequence.
    let width = out_tokens.iter().map(Vec::len).max().unwrap_or(0);
    let mut token_data = vec![0u32; batch * width];
    let mut prob_data = vec![0f32; batch * width];
    for i in 0..batch {
        token_data[i * width..i * width + out_tokens[i].len()].copy_from_slice(&out_tokens[i]);
        prob_data[i * width..i * width + out_probs[i].len()].copy_from_slice(&out_probs[i]);
    }
    let tokens = Tensor::from_vec(token_data, (batch, width), logits.device())?;
    let probs = Tensor::from_vec(prob_data, (batch, width), logits.device())?;
    Ok((tokens, probs))
}

/// Single-pass run-length collapse of one sample's frame probabilities.
///
/// Frames whose arg-max is the blank symbol 0 are dropped before the
/// collapse, so `[1, 1, 0, 1]` collapses to `[1]` and the run's confidence
/// spans the dropped blank.
fn collapse_row(frames: &[Vec<f32>]) -> (Vec<u32>, Vec<f32>) {
    let mut tokens: Vec<u32> = Vec::new();
    let mut probs: Vec<f32> = Vec::new();
    for frame in frames {
        let (symbol, p) = argmax(frame);
        if symbol == 0 {
            continue;
        }
        match (tokens.last(), probs.last_mut()) {
            (Some(&prev), Some(last)) if prev == symbol => {
                // Extend the current run, keep the strongest frame.
                if p > *last {
                    *last = p;
                }
            }
            _ => {
                tokens.push(symbol);
                probs.push(p);
            }
        }
    }
    (tokens, probs)
}

/// Index and value of the first maximal entry.
fn argmax(values: &[f32]) -> (u32, f32) {
    let mut best = 0usize;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    (best as u32, values[best])
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// Build `[1, T, V]` logits whose per-frame arg-max follows `symbols`.
    fn logits_for(symbols: &[u32], vocab: usize, dev: &Device) -> Tensor {
        let mut data = vec![0f32; symbols.len() * vocab];
        for (t, &s) in symbols.iter().enumerate() {
            data[t * vocab + s as usize] = 8.0;
        }
        Tensor::from_vec(data, (1, symbols.len(), vocab), dev).unwrap()
    }

    #[test]
    fn collapses_runs_and_drops_blanks() {
        let dev = Device::Cpu;
        let logits = logits_for(&[0, 1, 1, 0, 2, 2], 5, &dev);
        let (tokens, probs) = get_dedup_tokens(&logits, None).unwrap();
        assert_eq!(tokens.to_vec2::<u32>().unwrap(), vec![vec![1, 2]]);
        let p: Vec<Vec<f32>> = probs.to_vec2().unwrap();
        assert_eq!(p[0].len(), 2);
        for &v in &p[0] {
            assert!(v > 0.9 && v <= 1.0, "{v}");
        }
    }

    #[test]
    fn blank_does_not_break_a_run() {
        let dev = Device::Cpu;
        let logits = logits_for(&[1, 1, 0, 1], 3, &dev);
        let (tokens, _) = get_dedup_tokens(&logits, None).unwrap();
        assert_eq!(tokens.to_vec2::<u32>().unwrap(), vec![vec![1]]);
    }

    #[test]
    fn run_confidence_spans_blank_separated_frames() {
        let dev = Device::Cpu;
        // arg-max [1, 0, 1]; the frame after the blank is the strongest.
        let data = vec![
            0.0f32, 2.0, 0.0, // symbol 1, weaker
            4.0, 0.0, 0.0, // blank
            0.0, 6.0, 0.0, // symbol 1, stronger
        ];
        let logits = Tensor::from_vec(data, (1, 3, 3), &dev).unwrap();
        let (tokens, probs) = get_dedup_tokens(&logits, None).unwrap();
        assert_eq!(tokens.to_vec2::<u32>().unwrap(), vec![vec![1]]);

        let strongest = {
            let p = candle_nn::ops::softmax_last_dim(&logits).unwrap();
            p.to_vec3::<f32>().unwrap()[0][2][1]
        };
        let got = probs.to_vec2::<f32>().unwrap()[0][0];
        assert!((got - strongest).abs() < 1e-6);
    }

    #[test]
    fn collapse_is_idempotent_on_one_hot_output() {
        let dev = Device::Cpu;
        let logits = logits_for(&[3, 3, 0, 1, 2, 2, 2], 5, &dev);
        let (tokens, _) = get_dedup_tokens(&logits, None).unwrap();
        let collapsed: Vec<u32> = tokens.to_vec2::<u32>().unwrap().remove(0);
        assert_eq!(collapsed, vec![3, 1, 2]);

        // Re-running on perfect one-hot logits of the collapsed output is a no-op.
        let again = logits_for(&collapsed, 5, &dev);
        let (tokens2, _) = get_dedup_tokens(&again, None).unwrap();
        assert_eq!(tokens2.to_vec2::<u32>().unwrap().remove(0), collapsed);
    }

    #[test]
    fn all_blank_row_pads_to_zero() {
        let dev = Device::Cpu;
        let a = logits_for(&[1, 1, 2], 4, &dev);
        let b = logits_for(&[0, 0, 0], 4, &dev);
        let both = Tensor::cat(&[&a, &b], 0).unwrap();
        let (tokens, probs) = get_dedup_tokens(&both, None).unwrap();
        assert_eq!(
            tokens.to_vec2::<u32>().unwrap(),
            vec![vec![1, 2], vec![0, 0]]
        );
        assert_eq!(probs.to_vec2::<f32>().unwrap()[1], vec![0.0, 0.0]);
    }

    #[test]
    fn lengths_exclude_padded_frames() {
        let dev = Device::Cpu;
        // Junk beyond the real length must not reach the output.
        let logits = logits_for(&[1, 2, 3, 3], 5, &dev);
        let (tokens, _) = get_dedup_tokens(&logits, Some(&[2])).unwrap();
        assert_eq!(tokens.to_vec2::<u32>().unwrap(), vec![vec![1, 2]]);
    }

    #[test]
    fn run_confidence_is_max_of_run() {
        let dev = Device::Cpu;
        // Two frames of symbol 1 with different peak strengths.
        let data = vec![
            0.0f32, 2.0, 0.0, // weaker
            0.0, 6.0, 0.0, // stronger
        ];
        let logits = Tensor::from_vec(data, (1, 2, 3), &dev).unwrap();
        let (tokens, probs) = get_dedup_tokens(&logits, None).unwrap();
        assert_eq!(tokens.to_vec2::<u32>().unwrap(), vec![vec![1]]);

        let strongest = {
            let p = candle_nn::ops::softmax_last_dim(&logits).unwrap();
            p.to_vec3::<f32>().unwrap()[0][1][1]
        };
        let got = probs.to_vec2::<f32>().unwrap()[0][0];
        assert!((got - strongest).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_are_a_contract_violation() {
        let dev = Device::Cpu;
        let logits = logits_for(&[1, 2], 4, &dev);
        assert!(get_dedup_tokens(&logits, Some(&[1, 1])).is_err());
        assert!(get_dedup_tokens(&logits, Some(&[3])).is_err());
    }

    #[test]
    fn zero_length_frame_axis_rejected() {
        let dev = Device::Cpu;
        let logits = Tensor::from_vec(Vec::<f32>::new(), (1, 0, 5), &dev).unwrap();
        assert!(get_dedup_tokens(&logits, None).is_err());
    }
}
