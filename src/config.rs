//! Model configuration.
//!
//! Mirrors the `model` section of the original DeepPhonemizer YAML configs.
//! Vocabulary sizes and the end-of-sequence id are resolved externally by the
//! tokenizer/preprocessor (outside this crate) and stored alongside the model
//! hyperparameters so a checkpoint is self-describing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which sequence model variant to build.
///
/// Parsing an unknown tag fails with an error naming the offending value and
/// this supported set — there is no way to construct an unsupported variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Bidirectional LSTM, non-autoregressive.
    Lstm,
    /// Encoder-only Transformer, non-autoregressive.
    Transformer,
    /// Encoder-decoder Transformer, autoregressive.
    AutoregTransformer,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Lstm => "lstm",
            ModelType::Transformer => "transformer",
            ModelType::AutoregTransformer => "autoreg_transformer",
        }
    }

    /// Whether this variant decodes one symbol at a time.
    pub fn is_autoregressive(&self) -> bool {
        matches!(self, ModelType::AutoregTransformer)
    }
}

/// Hyperparameters for one model variant.
///
/// The LSTM fields (`lstm_dim`, `num_layers`) and the Transformer fields
/// (`d_model`, `d_fft`, `layers`, `dropout`, `heads`) coexist; only the
/// fields matching [`ModelConfig::model_type`] are consulted at build time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(rename = "type")]
    pub model_type: ModelType,

    // --- LSTM variant ---
    pub lstm_dim: usize,
    pub num_layers: usize,

    // --- Transformer variants ---
    pub d_model: usize,
    pub d_fft: usize,
    pub layers: usize,
    pub dropout: f32,
    pub heads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::Transformer,
            lstm_dim: 512,
            num_layers: 3,
            d_model: 512,
            d_fft: 1024,
            layers: 4,
            dropout: 0.1,
            heads: 1,
        }
    }
}

/// Top-level configuration persisted next to the model weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,

    /// Input (grapheme) vocabulary size.
    pub encoder_vocab_size: usize,
    /// Output (phoneme) vocabulary size.
    pub decoder_vocab_size: usize,
    /// End-of-sequence id in the output vocabulary (autoregressive only).
    pub end_index: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            encoder_vocab_size: 0,
            decoder_vocab_size: 0,
            end_index: 0,
        }
    }
}

impl Config {
    /// Read a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no model can be built from.
    ///
    /// Empty vocabularies are a configuration error, not a runtime condition.
    pub fn validate(&self) -> Result<()> {
        if self.encoder_vocab_size == 0 || self.decoder_vocab_size == 0 {
            return Err(Error::Config(format!(
                "vocabulary sizes must be positive, got encoder={} decoder={}",
                self.encoder_vocab_size, self.decoder_vocab_size
            )));
        }
        if self.model.model_type.is_autoregressive()
            && self.end_index as usize >= self.decoder_vocab_size
        {
            return Err(Error::Config(format!(
                "end_index {} outside decoder vocabulary of size {}",
                self.end_index, self.decoder_vocab_size
            )));
        }
        Ok(())
    }
}
