use std::sync::Mutex;

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::info;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCWHISPER_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
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

/// ColBERT-backed [`Embedder`] that loads its model on first use.
///
/// ColBERT produces one vector per token; each text is reduced to a single
/// vector by averaging its non-padding token vectors.
pub struct ModelManager {
    model: Mutex<Option<ColBERT>>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `DOCWHISPER_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`lightonai/GTE-ModernColBERT-v1`)
    ///
    /// The model is not loaded until the first call to `embed_batch`.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(model_id)
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: Mutex::new(None),
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    /// Encodes texts into token-level embeddings of shape `[B, T, D]`.
    ///
    /// `is_query` selects the query encoding (query prefix and expansion)
    /// instead of the document encoding.
    fn encode(&self, texts: &[String], is_query: bool) -> Result<Tensor> {
        let mut guard = self
            .model
            .lock()
            .map_err(|_| Error::Embedding("model lock poisoned".to_string()))?;

        if guard.is_none() {
            info!(model = %self.model_id, "loading embedding model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    Error::Embedding(format!(
                        "failed to load model {}: {e}",
                        self.model_id
                    ))
                })?;
            *guard = Some(colbert);
        }

        let model = guard
            .as_mut()
            .ok_or_else(|| Error::Embedding("model not loaded".to_string()))?;
        model
            .encode(texts, is_query)
            .map_err(|e| Error::Embedding(format!("failed to encode: {e}")))
    }
}

impl Embedder for ModelManager {
    fn name(&self) -> String {
        format!("colbert:{}", self.model_id)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        pooled(&self.encode(texts, false)?)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        pooled(&self.encode(&[query.to_string()], true)?)?
            .pop()
            .ok_or_else(|| Error::Embedding("model returned no vector".into()))
    }
}

/// Mean-pool a `[B, T, D]` tensor into one vector per text.
fn pooled(embeddings: &Tensor) -> Result<Vec<Vec<f32>>> {
    embeddings.dims3().map_err(|e| {
        Error::Embedding(format!("unexpected embedding tensor shape: {e}"))
    })?;
    let tokens: Vec<Vec<Vec<f32>>> = embeddings.to_vec3().map_err(|e| {
        Error::Embedding(format!("failed to convert tensor to f32: {e}"))
    })?;

    Ok(tokens.iter().map(|doc| mean_pool(doc)).collect())
}

/// Average the token vectors of one text, skipping all-zero padding rows.
fn mean_pool(tokens: &[Vec<f32>]) -> Vec<f32> {
    let dimension = tokens.first().map_or(0, Vec::len);
    let mut sum = vec![0.0f32; dimension];
    let mut count = 0usize;

    for token in tokens.iter().filter(|t| t.iter().any(|x| *x != 0.0)) {
        for (acc, x) in sum.iter_mut().zip(token) {
            *acc += x;
        }
        count += 1;
    }

    if count > 0 {
        for acc in &mut sum {
            *acc /= count as f32;
        }
    }
    sum
}
