use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use candle_core::{DType, Device};
use serde::{Deserialize, de::DeserializeOwned};
use tokenizers::Tokenizer;

use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
pub fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Preferred weight dtype for a device: half precision on accelerators,
/// full precision on CPU.
pub fn default_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::BF16
    }
}

/// Local paths of the files needed to instantiate a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    /// One file for single-file checkpoints, every shard otherwise.
    pub weights: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct WeightsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

impl ModelFiles {
    /// Resolve model files from a local directory or the Hugging Face Hub.
    ///
    /// If `model_id` names an existing directory, files are read from it.
    /// Otherwise it is treated as a Hub repository id and downloaded into
    /// `cache_dir` (already cached files are reused).
    pub fn resolve(model_id: &str, cache_dir: &Path) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Self::from_dir(local);
        }
        Self::download(model_id, cache_dir)
    }

    /// Collect model files from a local directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let require = |name: &str| {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(Error::Model(format!(
                    "{} is missing {name}",
                    dir.display()
                )))
            }
        };

        let config = require(CONFIG_FILE)?;
        let tokenizer = require(TOKENIZER_FILE)?;

        let single = dir.join(WEIGHTS_FILE);
        let weights = if single.is_file() {
            vec![single]
        } else {
            let index = require(WEIGHTS_INDEX_FILE)?;
            shard_names(&index)?
                .into_iter()
                .map(|name| dir.join(name))
                .collect()
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    fn download(model_id: &str, cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|_| Error::DataDir(cache_dir.to_path_buf()))?;

        let api = hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_progress(false)
            .build()
            .map_err(|e| hub_error(model_id, e))?;
        let repo = api.model(model_id.to_string());

        tracing::info!(model = model_id, "fetching model files");

        let fetch = |name: &str| {
            repo.get(name).map_err(|e| hub_error(model_id, e))
        };

        let config = fetch(CONFIG_FILE)?;
        let tokenizer = fetch(TOKENIZER_FILE)?;
        let weights = match fetch(WEIGHTS_FILE) {
            Ok(path) => vec![path],
            Err(single_err) => {
                let Ok(index) = fetch(WEIGHTS_INDEX_FILE) else {
                    return Err(single_err);
                };
                shard_names(&index)?
                    .iter()
                    .map(|name| fetch(name))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

/// Unique shard file names listed in a safetensors index, sorted.
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let index: WeightsIndex = read_json(index_path)?;
    let names: BTreeSet<String> = index.weight_map.into_values().collect();
    if names.is_empty() {
        return Err(Error::Model(format!(
            "{} lists no weight files",
            index_path.display()
        )));
    }
    Ok(names.into_iter().collect())
}

/// Deserialize a JSON file (model configs, weight indexes).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Load a `tokenizer.json` file.
pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path).map_err(|e| {
        Error::Model(format!(
            "failed to load tokenizer {}: {e}",
            path.display()
        ))
    })
}

fn hub_error(model_id: &str, error: impl std::fmt::Display) -> Error {
    Error::Model(format!("failed to fetch {model_id}: {error}"))
}
