use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::ClientField;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(Path::new("."))
    }

    /// Layer `config.toml`, `config.<RUST_ENV>.toml` (both relative to `base`)
    /// and `APP_*` env vars on top of the built-in defaults.
    pub fn load_with(base: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(base.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(base.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(base.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(base.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The fully typed, validated settings tree.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub search: SearchSettings,
    pub client_search: ClientSearchSettings,
    pub chunk_search: ChunkSearchSettings,
    pub reranker: RerankerSettings,
    pub rrf: RrfSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub summarization: SummarizationSettings,
    pub data: DataSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { default_top_k: 10, max_top_k: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSearchSettings {
    /// Clients must score strictly above this.
    pub min_similarity: f32,
    pub fields: Vec<ClientField>,
}

impl Default for ClientSearchSettings {
    fn default() -> Self {
        Self { min_similarity: 0.0, fields: ClientField::ALL.to_vec() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSearchSettings {
    pub vector_similarity_threshold: Option<f32>,
    /// Each retriever fetches `top_m * retrieval_multiplier` candidates.
    pub retrieval_multiplier: usize,
    pub lexical_weight: f32,
    pub trigram_weight: f32,
    pub trigram_threshold: f32,
    pub reranker_score_threshold: f32,
}

impl Default for ChunkSearchSettings {
    fn default() -> Self {
        Self {
            vector_similarity_threshold: None,
            retrieval_multiplier: 3,
            lexical_weight: 0.7,
            trigram_weight: 0.3,
            trigram_threshold: 0.3,
            reranker_score_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub model: String,
    pub top_m: usize,
    pub max_concurrency: usize,
    pub batch_size: usize,
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self { model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(), top_m: 30, max_concurrency: 2, batch_size: 16 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RrfSettings {
    pub k: f32,
}

impl Default for RrfSettings {
    fn default() -> Self {
        Self { k: 60.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model: String,
    pub dim: usize,
    pub max_len: usize,
    /// Local model directory; falls back to `APP_MODEL_DIR` / `MODEL_DIR`.
    pub model_dir: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { model: "sentence-transformers/all-MiniLM-L6-v2".to_string(), dim: 384, max_len: 256, model_dir: None }
    }
}

/// `[CLS]` and `[SEP]` added by the embedding tokenizer around every chunk.
pub const SPECIAL_TOKENS_PER_SEQUENCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: 254, overlap: 25 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub root: String,
    pub tantivy_dir: String,
    pub lancedb_dir: String,
    pub catalog_file: String,
    pub table: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            root: "~/.nevis".to_string(),
            tantivy_dir: "tantivy".to_string(),
            lancedb_dir: "lancedb".to_string(),
            catalog_file: "catalog.json".to_string(),
            table: "chunks".to_string(),
        }
    }
}

impl DataSettings {
    pub fn root_dir(&self) -> PathBuf {
        expand_path(&self.root)
    }

    pub fn tantivy_path(&self) -> PathBuf {
        resolve_with_base(&self.root_dir(), &self.tantivy_dir)
    }

    pub fn lancedb_path(&self) -> PathBuf {
        resolve_with_base(&self.root_dir(), &self.lancedb_dir)
    }

    pub fn catalog_path(&self) -> PathBuf {
        resolve_with_base(&self.root_dir(), &self.catalog_file)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.search.default_top_k == 0 || self.search.default_top_k > self.search.max_top_k {
            return invalid(format!("search.default_top_k must be in 1..={}, got {}", self.search.max_top_k, self.search.default_top_k));
        }
        if self.chunking.chunk_size == 0 || self.chunking.overlap >= self.chunking.chunk_size {
            return invalid(format!("chunking.overlap ({}) must be smaller than a non-zero chunking.chunk_size ({})", self.chunking.overlap, self.chunking.chunk_size));
        }
        if !(self.rrf.k.is_finite() && self.rrf.k > 0.0) {
            return invalid(format!("rrf.k must be positive, got {}", self.rrf.k));
        }
        if self.reranker.top_m == 0 || self.reranker.max_concurrency == 0 || self.reranker.batch_size == 0 {
            return invalid("reranker.top_m, max_concurrency and batch_size must be non-zero".to_string());
        }
        if self.chunk_search.retrieval_multiplier == 0 {
            return invalid("chunk_search.retrieval_multiplier must be non-zero".to_string());
        }
        let cs = &self.chunk_search;
        if cs.lexical_weight < 0.0 || cs.trigram_weight < 0.0 || cs.lexical_weight + cs.trigram_weight <= 0.0 {
            return invalid(format!("chunk_search weights must be non-negative and not both zero ({}, {})", cs.lexical_weight, cs.trigram_weight));
        }
        if !(0.0..=1.0).contains(&cs.trigram_threshold) {
            return invalid(format!("chunk_search.trigram_threshold must be in [0, 1], got {}", cs.trigram_threshold));
        }
        if self.client_search.fields.is_empty() {
            return invalid("client_search.fields must name at least one field".to_string());
        }
        if self.embedding.dim == 0 || self.embedding.max_len == 0 {
            return invalid("embedding.dim and embedding.max_len must be non-zero".to_string());
        }
        if self.chunking.chunk_size + SPECIAL_TOKENS_PER_SEQUENCE > self.embedding.max_len {
            return invalid(format!(
                "chunking.chunk_size ({}) plus {} special tokens exceeds embedding.max_len ({})",
                self.chunking.chunk_size, SPECIAL_TOKENS_PER_SEQUENCE, self.embedding.max_len
            ));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
