//! Cross-encoder pairwise scoring (`cross-encoder/ms-marco-MiniLM-L-6-v2`).
//!
//! Scores are the classifier's raw logit; the ms-marco models put clearly
//! relevant passages above ~2 and unrelated ones well below zero.
use anyhow::Result;
use candle_core::{DType, Device, IndexOp};
use candle_nn::{linear, Linear, Module, VarBuilder};
use candle_transformers::models::bert::BertModel;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use nevis_core::analysis::analyze;
use nevis_core::config::RerankerSettings;
use nevis_core::traits::PairwiseScorer;
use nevis_core::trigram::word_similarity;
use nevis_core::Error;

use crate::{fake_requested, load_bert_config, load_weights, local_model_dir, select_device, tokenize};

const MAX_PAIR_TOKENS: usize = 512;

/// BERT encoder, tanh pooler over `[CLS]`, single-logit classifier head.
pub struct CrossEncoder {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    max_len: usize,
}

impl CrossEncoder {
    pub fn load(model_dir: &Path, model_id: impl Into<String>) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading cross-encoder");
        let tokenizer = tokenize::load_tokenizer(model_dir)?;
        let (config, shape) = load_bert_config(model_dir)?;
        let vb = VarBuilder::from_tensors(load_weights(model_dir, &device)?, DType::F32, &device);
        let bert = BertModel::load(vb.pp("bert"), &config)?;
        let pooler = linear(shape.hidden_size, shape.hidden_size, vb.pp("bert.pooler.dense"))?;
        let classifier = linear(shape.hidden_size, 1, vb.pp("classifier"))?;
        let max_len = MAX_PAIR_TOKENS.min(shape.max_position_embeddings);
        Ok(Self { bert, pooler, classifier, tokenizer, device, model_id: model_id.into(), max_len })
    }

    fn score_inner(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, p.as_str())).collect();
        let batch = tokenize::tokenize_batch_on_device(&self.tokenizer, pairs, self.max_len, &self.device)?;
        let hidden = self.bert.forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?.squeeze(1)?;
        let scores: Vec<f32> = logits.to_device(&Device::Cpu)?.to_vec1()?;
        debug!(pairs = scores.len(), "cross-encoder batch scored");
        Ok(scores)
    }
}

impl PairwiseScorer for CrossEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score_batch(&self, query: &str, passages: &[String]) -> nevis_core::Result<Vec<f32>> {
        self.score_inner(query, passages).map_err(|e| Error::capability("reranker", e))
    }
}

/// Deterministic stand-in with roughly the cross-encoder's scale:
/// `8 * term_overlap + 4 * trigram_containment - 4`, in `[-4, 8]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeScorer;

impl FakeScorer {
    pub fn score(query: &str, passage: &str) -> f32 {
        let q: HashSet<String> = analyze(query).into_iter().collect();
        let overlap = if q.is_empty() {
            0.0
        } else {
            let p: HashSet<String> = analyze(passage).into_iter().collect();
            q.intersection(&p).count() as f32 / q.len() as f32
        };
        8.0 * overlap + 4.0 * word_similarity(query, passage) - 4.0
    }
}

impl PairwiseScorer for FakeScorer {
    fn model_id(&self) -> &str {
        "fake-overlap-scorer"
    }

    fn score_batch(&self, query: &str, passages: &[String]) -> nevis_core::Result<Vec<f32>> {
        Ok(passages.iter().map(|p| Self::score(query, p)).collect())
    }
}

/// The cross-encoder from `APP_RERANKER_DIR` or `models/<name>`, or the fake.
pub fn get_default_scorer(settings: &RerankerSettings) -> Result<Arc<dyn PairwiseScorer>> {
    if fake_requested() {
        info!("using FakeScorer");
        return Ok(Arc::new(FakeScorer));
    }
    let dir = match std::env::var("APP_RERANKER_DIR") {
        Ok(dir) if Path::new(&dir).exists() => nevis_core::config::expand_path(dir),
        _ => local_model_dir(&settings.model)?,
    };
    Ok(Arc::new(CrossEncoder::load(&dir, &settings.model)?))
}
