//! Checkpoint I/O.
//!
//! A checkpoint is a directory holding `config.json` (the [`Config`] the
//! model was built from) and `model.safetensors` (all parameters plus the
//! 1-element `step` counter). Loading reconstructs the variant named by the
//! config and leaves it in evaluation mode.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::config::Config;
use crate::model::Model;
use crate::{Error, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Reconstruct the model variant named by the checkpoint's config and restore
/// its parameters.
///
/// An unsupported `model.type` tag fails at config parse, naming the tag and
/// the supported set.
pub fn load_checkpoint(dir: impl AsRef<Path>, device: &Device) -> Result<(Model, Config)> {
    let dir = dir.as_ref();
    let config = Config::from_file(dir.join(CONFIG_FILE))?;
    let weights = dir.join(WEIGHTS_FILE);
    tracing::info!(
        model_type = config.model.model_type.as_str(),
        path = %weights.display(),
        "loading checkpoint"
    );
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[&weights], DType::F32, device)
            .map_err(|e| Error::WeightLoad(format!("{}: {e}", weights.display())))?
    };
    let model = Model::from_config(&config, vb)?;
    Ok((model, config))
}

/// Persist a trained model: every parameter in `varmap` plus the model's
/// current step counter, next to its configuration.
pub fn save_checkpoint(
    varmap: &VarMap,
    step: u64,
    config: &Config,
    dir: impl AsRef<Path>,
) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let file = std::fs::File::create(dir.join(CONFIG_FILE))?;
    serde_json::to_writer_pretty(file, config)?;

    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::WeightLoad("parameter map lock poisoned".into()))?;
    let mut tensors: HashMap<String, Tensor> = data
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect();
    // The in-memory counter is authoritative; the VarMap copy is stale.
    tensors.insert(
        "step".to_string(),
        Tensor::from_vec(vec![step as f32], (1,), &Device::Cpu)?,
    );
    candle_core::safetensors::save(&tensors, dir.join(WEIGHTS_FILE))?;
    Ok(())
}
