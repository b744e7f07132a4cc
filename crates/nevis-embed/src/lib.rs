//! nevis-embed
//!
//! Candle-backed model capabilities: a BERT sentence embedder, a BERT
//! cross-encoder for pairwise scoring, and a HuggingFace tokenizer adapter
//! for the chunker. Deterministic fakes stand in for all three when
//! `APP_USE_FAKE_EMBEDDINGS=1`.
pub mod device;
pub mod pool;
pub mod rerank;
pub mod tokenize;

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use nevis_core::analysis::analyze;
use nevis_core::chunker::WhitespaceTokenizer;
use nevis_core::config::EmbeddingSettings;
use nevis_core::traits::{Embedder, TokenSpans};
use nevis_core::Error;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use rerank::{get_default_scorer, CrossEncoder, FakeScorer};
pub use tokenize::{tokenize_batch_on_device, HfTokenSpans};

/// Load every tensor of a checkpoint directory, preferring safetensors.
pub(crate) fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let weights_path = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&weights_path).map_err(|e| anyhow!("Failed to read {}: {}", weights_path.display(), e))?;
    Ok(weights.into_iter().collect())
}

/// The few `config.json` values the wrappers need besides the model itself.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub(crate) struct ModelShape {
    pub hidden_size: usize,
    pub max_position_embeddings: usize,
}

pub(crate) fn load_bert_config(model_dir: &Path) -> Result<(BertConfig, ModelShape)> {
    let config_path = model_dir.join("config.json");
    let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow!("Failed to read {}: {}", config_path.display(), e))?;
    Ok((serde_json::from_str(&raw)?, serde_json::from_str(&raw)?))
}

pub fn fake_requested() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Mean-pooled, L2-normalized BERT sentence embeddings
/// (`sentence-transformers/all-MiniLM-L6-v2` by default).
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dim: usize,
    max_len: usize,
}

impl BertEmbedder {
    pub fn load(model_dir: &Path, model_id: impl Into<String>, max_len: usize) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading embedding model");
        let tokenizer = tokenize::load_tokenizer(model_dir)?;
        let (config, shape) = load_bert_config(model_dir)?;
        let vb = VarBuilder::from_tensors(load_weights(model_dir, &device)?, DType::F32, &device);
        let model = BertModel::load(vb, &config)?;
        let max_len = max_len.min(shape.max_position_embeddings);
        Ok(Self { model, tokenizer, device, model_id: model_id.into(), dim: shape.hidden_size, max_len })
    }

    fn embed_inner(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let batch = tokenize_batch_on_device(&self.tokenizer, texts.iter().map(String::as_str).collect::<Vec<&str>>(), self.max_len, &self.device)?;
        let hidden = self.model.forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &batch.attention_mask.to_dtype(DType::F32)?)?;
        let out: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        if out.iter().any(|v| v.len() != self.dim) {
            return Err(anyhow!("model produced vectors of the wrong width"));
        }
        if start.elapsed().as_millis() > 500 {
            warn!(texts = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "slow embedding batch");
        }
        Ok(out)
    }
}

impl Embedder for BertEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> nevis_core::Result<Vec<Vec<f32>>> {
        self.embed_inner(texts).map_err(|e| Error::capability("embedding", e))
    }
}

/// Hashes analyzed terms into a fixed number of buckets. Texts sharing a
/// stem share a bucket, so overlap in wording shows up as cosine similarity.
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for term in analyze(text) {
            let mut hasher = XxHash64::with_seed(0);
            term.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + val * 0.5;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str {
        "fake-hash-embedder"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> nevis_core::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if fake_requested() {
        info!(dim = settings.dim, "using FakeEmbedder");
        return Ok(Arc::new(FakeEmbedder::new(settings.dim)));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref(), &settings.model)?;
    let model = BertEmbedder::load(&dir, &settings.model, settings.max_len)?;
    if model.dim() != settings.dim {
        return Err(anyhow!("embedding.dim is {} but {} produces {}-d vectors", settings.dim, settings.model, model.dim()));
    }
    Ok(Arc::new(model))
}

/// The chunker's tokenizer: the embedding model's own, or whitespace
/// splitting under fakes.
pub fn get_default_token_spans(settings: &EmbeddingSettings) -> Result<Arc<dyn TokenSpans>> {
    if fake_requested() {
        return Ok(Arc::new(WhitespaceTokenizer));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref(), &settings.model)?;
    Ok(Arc::new(HfTokenSpans::from_model_dir(&dir)?))
}

/// Find a local checkout of `model`: explicit setting, `APP_MODEL_DIR`,
/// `MODEL_DIR`, then `models/<name>` or `../models/<name>`.
pub fn resolve_model_dir(explicit: Option<&str>, model: &str) -> Result<PathBuf> {
    let from_env = ["APP_MODEL_DIR", "MODEL_DIR"].iter().filter_map(|k| std::env::var(k).ok());
    for dir in explicit.map(str::to_string).into_iter().chain(from_env) {
        let p = nevis_core::config::expand_path(&dir);
        if p.exists() { info!(dir = %p.display(), "using model dir"); return Ok(p); }
    }
    local_model_dir(model)
}

pub(crate) fn local_model_dir(model: &str) -> Result<PathBuf> {
    let name = model.rsplit('/').next().unwrap_or(model);
    for root in ["models", "../models"] {
        let p = Path::new(root).join(name);
        if p.exists() { info!(dir = %p.display(), "using model dir"); return Ok(p); }
    }
    Err(anyhow!("Could not locate a local directory for model {}", model))
}
