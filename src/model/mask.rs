//! Padding and causal (subsequent-position) masks.
//!
//! Masks are boolean `U8` tensors with `1` marking a blocked/padded position.
//! Attention applies them by filling blocked scores with the dtype minimum
//! before the softmax — never by unconditional additive `-inf`, so a fully
//! padded query row degrades to a uniform distribution instead of NaN.

use candle_core::{Device, Tensor};

use crate::Result;

/// Square subsequent-position mask of shape `[len, len]`.
///
/// Row `i` may attend only to columns `<= i`; the strict upper triangle is
/// blocked.
pub fn causal_mask(len: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0u8; len * len];
    for i in 0..len {
        for j in (i + 1)..len {
            data[i * len + j] = 1;
        }
    }
    Ok(Tensor::from_vec(data, (len, len), device)?)
}

/// Key-padding mask for a batch of id sequences `[B, T]`.
///
/// `1` where the id equals the pad symbol `0`.
pub fn padding_mask(ids: &Tensor) -> Result<Tensor> {
    Ok(ids.eq(0u32)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn causal_mask_blocks_strict_upper_triangle() {
        let mask = causal_mask(4, &Device::Cpu).unwrap();
        assert_eq!(mask.dims(), &[4, 4]);
        let rows: Vec<Vec<u8>> = mask.to_vec2().unwrap();
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                assert_eq!(v, u8::from(j > i), "position ({i},{j})");
            }
        }
    }

    #[test]
    fn padding_mask_marks_zero_ids() {
        let ids = Tensor::new(&[[3u32, 1, 0, 0], [2, 0, 0, 0]], &Device::Cpu).unwrap();
        let mask = padding_mask(&ids).unwrap();
        let rows: Vec<Vec<u8>> = mask.to_vec2().unwrap();
        assert_eq!(rows, vec![vec![0, 0, 1, 1], vec![0, 1, 1, 1]]);
    }
}
