//! Padding and collation of ragged id sequences.
//!
//! This is the collation contract the training-mode forward path consumes:
//! ragged u32 id sequences right-padded with 0 into a rectangular `[B, T]`
//! tensor plus per-sample real lengths. Data loading and length-binned batch
//! sampling live outside this crate.

use candle_core::{Device, Tensor};

use crate::{Error, Result};

/// One sample before collation.
#[derive(Debug, Clone)]
pub struct DataItem {
    pub language: u32,
    pub text: Vec<u32>,
    pub phonemes: Vec<u32>,
}

/// One collated training batch.
pub struct Batch {
    /// `[B, T_text]` padded grapheme ids.
    pub text: Tensor,
    pub text_len: Vec<usize>,
    /// `[B, T_phonemes]` padded phoneme ids.
    pub phonemes: Tensor,
    pub phonemes_len: Vec<usize>,
    pub language: Vec<u32>,
    pub item_id: Vec<usize>,
}

/// Right-pad ragged id sequences with 0 into `[B, T]`, returning the tensor
/// and each sample's real length.
pub fn pad_batch(seqs: &[Vec<u32>], device: &Device) -> Result<(Tensor, Vec<usize>)> {
    if seqs.is_empty() {
        return Err(Error::Shape("cannot pad an empty batch".into()));
    }
    let width = seqs.iter().map(Vec::len).max().unwrap_or(0);
    let mut data = vec![0u32; seqs.len() * width];
    let mut lengths = Vec::with_capacity(seqs.len());
    for (i, seq) in seqs.iter().enumerate() {
        data[i * width..i * width + seq.len()].copy_from_slice(seq);
        lengths.push(seq.len());
    }
    let padded = Tensor::from_vec(data, (seqs.len(), width), device)?;
    Ok((padded, lengths))
}

/// Collate samples into one padded batch.
pub fn collate(items: &[DataItem], device: &Device) -> Result<Batch> {
    let text: Vec<Vec<u32>> = items.iter().map(|i| i.text.clone()).collect();
    let phonemes: Vec<Vec<u32>> = items.iter().map(|i| i.phonemes.clone()).collect();
    let (text, text_len) = pad_batch(&text, device)?;
    let (phonemes, phonemes_len) = pad_batch(&phonemes, device)?;
    Ok(Batch {
        text,
        text_len,
        phonemes,
        phonemes_len,
        language: items.iter().map(|i| i.language).collect(),
        item_id: (0..items.len()).collect(),
    })
}
