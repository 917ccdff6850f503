//! Grapheme-to-phoneme sequence models in pure Rust.
//!
//! A candle-based implementation of the DeepPhonemizer model family: symbol
//! ids in, phoneme ids with per-symbol confidences out. Three selectable
//! variants share one construction and generation contract:
//!
//! ```text
//! grapheme ids ─┬→ LstmModel ───────────────┐
//!               ├→ ForwardTransformer ──────┤→ frame logits → dedup decode
//!               └→ AutoregressiveTransformer ─→ stepwise greedy decode
//!                                                     ↓
//!                                       (phoneme ids, confidences)
//! ```
//!
//! The non-autoregressive variants emit one logit frame per input symbol and
//! rely on CTC-style dedup collapsing; the autoregressive variant encodes the
//! source once and decodes symbol by symbol under a causal mask until every
//! sequence in the batch has produced the end symbol.
//!
//! ## Modules
//!
//! - [`model`] — the three model variants, attention, masking, dedup decoding
//! - [`config`] — model selection and hyperparameters (serde)
//! - [`checkpoint`] — `{config.json, model.safetensors}` load/save
//! - [`batch`] — padding/collation of ragged id sequences

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod model;

mod error;

pub use config::{Config, ModelConfig, ModelType};
pub use error::{Error, Result};
pub use model::{Generated, GenerateOptions, Model};
