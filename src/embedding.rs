use std::{
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{self, BertModel};
use serde::Deserialize;
use tokenizers::{
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationParams,
};

use crate::{
    error::{Error, Result},
    model_manager::{self, ModelFiles, default_device},
};

/// Longest token sequence fed to the encoder; longer passages are truncated.
const MAX_SEQUENCE_LENGTH: usize = 512;

/// Turns text into fixed-length vectors.
///
/// Implementations must be deterministic for a given model: the same text
/// always maps to the same vector, and every vector has [`dimension`]
/// components.
///
/// [`dimension`]: Embedder::dimension
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per text, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Model("embedding provider returned no vector".into())
            })
    }

    /// Length of the vectors produced by [`Embedder::embed`].
    fn dimension(&self) -> Result<usize>;

    /// Identifier of the underlying model, recorded in snapshot manifests.
    fn model_id(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct EncoderShape {
    hidden_size: usize,
}

struct LoadedEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Sentence-transformers style encoder: a BERT model whose token outputs are
/// mean-pooled over the attention mask.
///
/// The model is loaded lazily on the first call that needs it, downloading
/// from the Hugging Face Hub into the cache directory when `model_id` is not
/// a local path.
pub struct SentenceEmbedder {
    model_id: String,
    cache_dir: PathBuf,
    loaded: Mutex<Option<LoadedEncoder>>,
    dimension: Mutex<Option<usize>>,
}

impl SentenceEmbedder {
    pub fn new(model_id: impl Into<String>, cache_dir: PathBuf) -> Self {
        Self {
            model_id: model_id.into(),
            cache_dir,
            loaded: Mutex::new(None),
            dimension: Mutex::new(None),
        }
    }

    /// Returns `true` if the model weights are already in memory.
    pub fn is_loaded(&self) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn load(&self) -> Result<LoadedEncoder> {
        let started = std::time::Instant::now();
        let files = ModelFiles::resolve(&self.model_id, &self.cache_dir)?;
        let config: bert::Config = model_manager::read_json(&files.config)?;

        let mut tokenizer = model_manager::load_tokenizer(&files.tokenizer)?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| Error::Model(format!("invalid truncation: {e}")))?;

        let device = default_device();
        // SAFETY: the weight files are not modified while they are mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                &files.weights,
                bert::DTYPE,
                &device,
            )?
        };
        let model = BertModel::load(vb, &config)?;

        tracing::info!(
            model = %self.model_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded embedding model"
        );

        Ok(LoadedEncoder {
            model,
            tokenizer,
            device,
        })
    }

    fn encode(
        encoder: &LoadedEncoder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let encodings = encoder
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &encoder.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let masks = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &encoder.device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        // [batch, tokens, hidden]
        let hidden = encoder.model.forward(
            &input_ids,
            &token_type_ids,
            Some(&attention_mask),
        )?;

        let mask = attention_mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;

        Ok(pooled.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

impl Embedder for SentenceEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard =
            self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let Some(encoder) = guard.as_ref() else {
            return Err(Error::Model("embedding model not loaded".into()));
        };

        let vectors = Self::encode(encoder, texts)?;
        tracing::debug!(batch = texts.len(), "embedded texts");
        Ok(vectors)
    }

    fn dimension(&self) -> Result<usize> {
        let mut cached =
            self.dimension.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dimension) = *cached {
            return Ok(dimension);
        }

        let files = ModelFiles::resolve(&self.model_id, &self.cache_dir)?;
        let shape: EncoderShape = model_manager::read_json(&files.config)?;
        *cached = Some(shape.hidden_size);
        Ok(shape.hidden_size)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
