use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use std::ops::Range;
use std::path::Path;
use tokenizers::{EncodeInput, Encoding, Tokenizer};

use nevis_core::traits::TokenSpans;
use nevis_core::Error;

/// Token tensors for one padded batch: `(input_ids, attention_mask, token_type_ids)`, each `[B,T]`.
pub struct BatchTensors {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

pub fn load_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let path = model_dir.join("tokenizer.json");
    Tokenizer::from_file(&path).map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))
}

fn pad_id(tokenizer: &Tokenizer) -> u32 {
    tokenizer.get_padding().map(|p| p.pad_id).unwrap_or(0)
}

/// Encode `inputs`, truncate each to `max_len` and right-pad the batch to its longest row.
pub fn tokenize_batch_on_device<'s, E>(tokenizer: &Tokenizer, inputs: Vec<E>, max_len: usize, device: &Device) -> Result<BatchTensors>
where
    E: Into<EncodeInput<'s>> + Send,
{
    let encodings: Vec<Encoding> = inputs
        .into_iter()
        .map(|i| tokenizer.encode(i, true).map_err(|e| anyhow!("Tokenization failed: {}", e)))
        .collect::<Result<_>>()?;
    let width = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(0).max(1);
    let pad = pad_id(tokenizer);
    let (mut ids, mut mask, mut types) = (Vec::new(), Vec::new(), Vec::new());
    for enc in &encodings {
        let n = enc.get_ids().len().min(max_len);
        ids.extend_from_slice(&enc.get_ids()[..n]);
        mask.extend_from_slice(&enc.get_attention_mask()[..n]);
        types.extend_from_slice(&enc.get_type_ids()[..n]);
        ids.extend(std::iter::repeat(pad).take(width - n));
        mask.extend(std::iter::repeat(0).take(width - n));
        types.extend(std::iter::repeat(0).take(width - n));
    }
    let b = encodings.len();
    Ok(BatchTensors {
        input_ids: Tensor::from_vec(ids, (b, width), device)?,
        attention_mask: Tensor::from_vec(mask, (b, width), device)?,
        token_type_ids: Tensor::from_vec(types, (b, width), device)?,
    })
}

/// Byte spans of a HuggingFace tokenizer's tokens, for token-exact chunking.
pub struct HfTokenSpans {
    tokenizer: Tokenizer,
}

impl HfTokenSpans {
    pub fn new(mut tokenizer: Tokenizer) -> Result<Self> {
        tokenizer.with_truncation(None).map_err(|e| anyhow!("Failed to disable truncation: {}", e))?;
        tokenizer.with_padding(None);
        Ok(Self { tokenizer })
    }

    pub fn from_model_dir(model_dir: &Path) -> Result<Self> {
        Self::new(load_tokenizer(model_dir)?)
    }
}

impl TokenSpans for HfTokenSpans {
    fn token_spans(&self, text: &str) -> nevis_core::Result<Vec<Range<usize>>> {
        let enc = self.tokenizer.encode(text, false).map_err(|e| Error::capability("tokenizer", e))?;
        Ok(enc.get_offsets().iter().filter(|(s, e)| e > s).map(|&(s, e)| s..e).collect())
    }
}
