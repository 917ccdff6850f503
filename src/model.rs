//! Sequence model variants for grapheme-to-phoneme conversion.
//!
//! ## Components
//!
//! - [`lstm`] — bidirectional LSTM, non-autoregressive
//! - [`forward_transformer`] — encoder-only Transformer, non-autoregressive
//! - [`autoregressive`] — encoder-decoder Transformer, one symbol per step
//! - [`decoding`] — CTC-style dedup collapse of frame-level logits
//! - [`attention`], [`layers`], [`mask`], [`positional`] — shared building blocks
//!
//! [`Model`] is the sum type over the three variants; [`Model::from_config`]
//! performs the type-tag switch, so an unsupported variant cannot be
//! constructed.

pub mod attention;
pub mod autoregressive;
pub mod decoding;
pub mod forward_transformer;
pub mod layers;
pub mod lstm;
pub mod mask;
pub mod positional;

use candle_core::Tensor;
use candle_nn::VarBuilder;

pub use autoregressive::AutoregressiveTransformer;
pub use decoding::get_dedup_tokens;
pub use forward_transformer::ForwardTransformer;
pub use lstm::LstmModel;
pub use positional::PositionalEncoding;

use crate::config::{Config, ModelType};
use crate::{Error, Result};

/// Generated tokens and per-token confidences, both `[B, L]`.
///
/// Rows shorter than `L` are right-padded with symbol 0 / probability 0
/// (non-autoregressive path); the autoregressive path is rectangular by
/// construction and includes the leading start symbol.
pub struct Generated {
    pub tokens: Tensor,
    pub probs: Tensor,
}

/// Options for [`Model::generate`].
pub struct GenerateOptions<'a> {
    /// Real sequence lengths, used by the non-autoregressive variants to keep
    /// padded frames out of the dedup collapse.
    pub input_lengths: Option<&'a [usize]>,
    /// `[B]` start symbol per sample; required by the autoregressive variant.
    pub start_index: Option<&'a Tensor>,
    /// Decode-step bound for the autoregressive variant.
    pub max_len: usize,
}

impl Default for GenerateOptions<'_> {
    fn default() -> Self {
        Self {
            input_lengths: None,
            start_index: None,
            max_len: 100,
        }
    }
}

/// Sum type over the three model variants.
pub enum Model {
    Lstm(LstmModel),
    ForwardTransformer(ForwardTransformer),
    AutoregressiveTransformer(AutoregressiveTransformer),
}

impl Model {
    /// Build the variant selected by `config.model.type` and read its
    /// parameters (including the step counter) from `vb`.
    pub fn from_config(config: &Config, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Ok(match config.model.model_type {
            ModelType::Lstm => Model::Lstm(LstmModel::from_config(config, vb)?),
            ModelType::Transformer => {
                Model::ForwardTransformer(ForwardTransformer::from_config(config, vb)?)
            }
            ModelType::AutoregTransformer => Model::AutoregressiveTransformer(
                AutoregressiveTransformer::from_config(config, vb)?,
            ),
        })
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Model::Lstm(_) => ModelType::Lstm,
            Model::ForwardTransformer(_) => ModelType::Transformer,
            Model::AutoregressiveTransformer(_) => ModelType::AutoregTransformer,
        }
    }

    /// Run inference on a padded id batch `[B, T]`.
    ///
    /// The autoregressive variant requires `opts.start_index`; the others
    /// ignore it. All variants return tokens and confidences per [`Generated`].
    pub fn generate(&self, input: &Tensor, opts: &GenerateOptions) -> Result<Generated> {
        match self {
            Model::Lstm(m) => m.generate(input, opts.input_lengths),
            Model::ForwardTransformer(m) => m.generate(input, opts.input_lengths),
            Model::AutoregressiveTransformer(m) => {
                let start = opts.start_index.ok_or_else(|| {
                    Error::Shape("autoregressive generation needs start ids".into())
                })?;
                m.generate(input, start, opts.max_len)
            }
        }
    }

    /// Number of training-mode forward passes this model has seen.
    pub fn step(&self) -> u64 {
        match self {
            Model::Lstm(m) => m.step(),
            Model::ForwardTransformer(m) => m.step(),
            Model::AutoregressiveTransformer(m) => m.step(),
        }
    }

    /// Switch between training and evaluation mode. Only training-mode
    /// forward passes touch the step counter; `generate` never does.
    pub fn set_train(&mut self, train: bool) {
        match self {
            Model::Lstm(m) => m.set_train(train),
            Model::ForwardTransformer(m) => m.set_train(train),
            Model::AutoregressiveTransformer(m) => m.set_train(train),
        }
    }
}

/// Read the persisted step counter, a 1-element tensor named `step`.
///
/// Builders that create missing variables (`VarMap`-backed, zeros)
/// initialize it to 1, matching a freshly constructed model; a checkpoint
/// missing the tensor fails the lookup instead.
pub(crate) fn read_step(vb: &VarBuilder) -> Result<u64> {
    let step = vb.get_with_hints((1,), "step", candle_nn::Init::Const(1.0))?;
    Ok(step.to_vec1::<f32>()?[0] as u64)
}
