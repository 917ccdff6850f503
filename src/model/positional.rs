//! Sinusoidal positional encoding with a learned scale.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::Result;

/// Maximum sequence length the precomputed table covers.
const MAX_LEN: usize = 5000;

/// Fixed sinusoidal positional signal, scaled by one learned scalar.
///
/// The table is precomputed on the host for [`MAX_LEN`] positions; `forward`
/// adds `scale * pe[..T]` to a `[B, T, D]` input and applies dropout in
/// training mode. The scale is the only learned parameter.
pub struct PositionalEncoding {
    pe: Tensor,    // [MAX_LEN, d_model]
    scale: Tensor, // [1]
    dropout: candle_nn::Dropout,
}

impl PositionalEncoding {
    pub fn new(d_model: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let mut pe = vec![0f32; MAX_LEN * d_model];
        for pos in 0..MAX_LEN {
            for i in (0..d_model).step_by(2) {
                let div_term = (-(i as f64) * (10_000f64).ln() / d_model as f64).exp();
                let angle = pos as f64 * div_term;
                pe[pos * d_model + i] = angle.sin() as f32;
                if i + 1 < d_model {
                    pe[pos * d_model + i + 1] = angle.cos() as f32;
                }
            }
        }
        let pe = Tensor::from_vec(pe, (MAX_LEN, d_model), vb.device())?;
        let scale = vb.get_with_hints((1,), "scale", candle_nn::Init::Const(1.0))?;
        Ok(Self {
            pe,
            scale,
            dropout: candle_nn::Dropout::new(dropout),
        })
    }

    /// Add the positional signal to `x` of shape `[B, T, D]`.
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (_b, t, _d) = x.dims3()?;
        let pe = self.pe.narrow(0, 0, t)?.unsqueeze(0)?; // [1, T, D]
        let x = x.broadcast_add(&pe.broadcast_mul(&self.scale)?)?;
        Ok(self.dropout.forward(&x, train)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn adds_signal_of_matching_shape() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let pos = PositionalEncoding::new(16, 0.1, vb.pp("pos")).unwrap();
        let x = Tensor::zeros((2, 7, 16), DType::F32, &dev).unwrap();
        let out = pos.forward(&x, false).unwrap();
        assert_eq!(out.dims(), &[2, 7, 16]);
    }

    #[test]
    fn first_position_starts_at_sin_zero_cos_one() {
        // pe[0] = [sin(0), cos(0), ...] = [0, 1, 0, 1, ...]
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let pos = PositionalEncoding::new(4, 0.0, vb.pp("pos")).unwrap();
        let first: Vec<f32> = pos.pe.narrow(0, 0, 1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(first, vec![0.0, 1.0, 0.0, 1.0]);
    }
}
