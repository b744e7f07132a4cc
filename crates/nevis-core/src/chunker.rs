//! Token-exact, boundary-aware chunking.
//!
//! Every token owns the bytes from its own start up to the next token's
//! start (the first token also owns any leading whitespace, the last one the
//! trailing tail). Chunks are contiguous runs of tokens, so the first chunk
//! plus the non-overlap part of each following chunk reproduces the input.
use std::ops::Range;
use std::sync::Arc;

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};
use crate::traits::TokenSpans;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    /// Byte range in the source text.
    pub start: usize,
    pub end: usize,
    pub token_count: usize,
    /// Leading tokens repeated from the previous chunk.
    pub overlap_tokens: usize,
    /// Byte offset in `text` where the non-overlap part starts.
    pub novel_offset: usize,
}

impl TextChunk {
    pub fn novel_text(&self) -> &str {
        &self.text[self.novel_offset..]
    }
}

/// Splits on runs of whitespace. Used when no model tokenizer is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl TokenSpans for WhitespaceTokenizer {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let mut spans = Vec::new();
        let mut current: Option<usize> = None;
        for (i, c) in text.char_indices() {
            match (c.is_whitespace(), current) {
                (true, Some(s)) => {
                    spans.push(s..i);
                    current = None;
                }
                (false, None) => current = Some(i),
                _ => {}
            }
        }
        if let Some(s) = current {
            spans.push(s..text.len());
        }
        Ok(spans)
    }
}

pub struct Chunker {
    config: ChunkingSettings,
    tokenizer: Arc<dyn TokenSpans>,
}

impl Chunker {
    pub fn new(config: ChunkingSettings, tokenizer: Arc<dyn TokenSpans>) -> Result<Self> {
        validate(config.chunk_size, config.overlap)?;
        Ok(Self { config, tokenizer })
    }

    pub fn config(&self) -> &ChunkingSettings {
        &self.config
    }

    pub fn chunk(&self, text: &str) -> Result<Vec<TextChunk>> {
        chunk(text, self.config.chunk_size, self.config.overlap, self.tokenizer.as_ref())
    }
}

fn validate(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidConfig("chunk size must be at least one token".into()));
    }
    if overlap >= chunk_size {
        return Err(Error::InvalidConfig(format!("overlap ({overlap}) must be smaller than chunk size ({chunk_size})")));
    }
    Ok(())
}

fn floor_char_boundary(text: &str, mut i: usize) -> usize {
    if i >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Token layout of one text: owned extents plus raw token ends.
struct Layout {
    /// `extent[i]` is the byte range token `i` owns.
    extent: Vec<Range<usize>>,
    /// End of the token's own characters, excluding trailing whitespace.
    content_end: Vec<usize>,
}

impl Layout {
    fn new(text: &str, spans: Vec<Range<usize>>) -> Self {
        let len = text.len();
        let mut starts = Vec::with_capacity(spans.len());
        let mut ends = Vec::with_capacity(spans.len());
        let mut floor = 0;
        for span in spans.into_iter().filter(|s| s.start < len) {
            let start = floor_char_boundary(text, span.start.max(floor));
            floor = start;
            starts.push(start);
            ends.push(span.end);
        }
        let n = starts.len();
        let mut extent = Vec::with_capacity(n);
        let mut content_end = Vec::with_capacity(n);
        for i in 0..n {
            let lo = if i == 0 { 0 } else { starts[i] };
            let hi = if i + 1 == n { len } else { starts[i + 1] };
            extent.push(lo..hi);
            content_end.push(floor_char_boundary(text, ends[i].clamp(starts[i], hi)));
        }
        Self { extent, content_end }
    }

    fn len(&self) -> usize {
        self.extent.len()
    }

    /// Whitespace between token `j - 1` and token `j`.
    fn gap<'a>(&self, text: &'a str, j: usize) -> &'a str {
        &text[self.content_end[j - 1]..self.extent[j].start]
    }

    fn paragraph_break_before(&self, text: &str, j: usize) -> bool {
        self.gap(text, j).matches('\n').count() >= 2
    }

    fn sentence_break_before(&self, text: &str, j: usize) -> bool {
        let prev = &text[self.extent[j - 1].start..self.content_end[j - 1]];
        prev.trim_end().ends_with(['.', '!', '?']) || self.gap(text, j).contains('\n')
    }
}

/// Split `text` into chunks of at most `chunk_size` tokens, each sharing
/// `overlap` tokens with its predecessor.
///
/// A chunk ends at the last paragraph break in its window, else the last
/// sentence break, else at the token limit. Only breaks that leave at least
/// one new token after the overlap are considered.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize, tokenizer: &dyn TokenSpans) -> Result<Vec<TextChunk>> {
    validate(chunk_size, overlap)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let layout = Layout::new(text, tokenizer.token_spans(text)?);
    let n = layout.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut carried = 0;
    loop {
        let end = if start + chunk_size >= n {
            n
        } else {
            let window = (start + overlap + 1)..=(start + chunk_size);
            window
                .clone()
                .rev()
                .find(|&j| layout.paragraph_break_before(text, j))
                .or_else(|| window.clone().rev().find(|&j| layout.sentence_break_before(text, j)))
                .unwrap_or(start + chunk_size)
        };

        let byte_start = layout.extent[start].start;
        let byte_end = layout.extent[end - 1].end;
        chunks.push(TextChunk {
            index: chunks.len(),
            text: text[byte_start..byte_end].to_string(),
            start: byte_start,
            end: byte_end,
            token_count: end - start,
            overlap_tokens: carried,
            novel_offset: layout.extent[start + carried].start - byte_start,
        });

        if end == n {
            break;
        }
        start = end - overlap;
        carried = overlap;
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk("", 10, 2, &WhitespaceTokenizer).unwrap().is_empty());
        assert!(chunk("   \n\n ", 10, 2, &WhitespaceTokenizer).unwrap().is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let text = "  a short note.  ";
        let chunks = chunk(text, 10, 2, &WhitespaceTokenizer).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].overlap_tokens, 0);
        assert_eq!(chunks[0].token_count, 3);
    }

    #[test]
    fn rejects_bad_config() {
        assert!(matches!(chunk("a b", 0, 0, &WhitespaceTokenizer), Err(Error::InvalidConfig(_))));
        assert!(matches!(chunk("a b", 4, 4, &WhitespaceTokenizer), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn raw_limit_split_keeps_exact_overlap() {
        let text = words(20);
        let chunks = chunk(&text, 10, 3, &WhitespaceTokenizer).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].token_count, 10);
        assert_eq!(chunks[1].overlap_tokens, 3);
        assert!(chunks[1].text.starts_with("w7 "));
        assert_eq!(chunks[2].token_count, 6);
    }

    #[test]
    fn prefers_paragraph_then_sentence_breaks() {
        let text = "one two three. four five\n\nsix seven eight nine ten eleven";
        let chunks = chunk(text, 8, 1, &WhitespaceTokenizer).unwrap();
        assert_eq!(chunks[0].text, "one two three. four five\n\n");

        let text = "one two three. four five six seven eight nine";
        let chunks = chunk(text, 6, 1, &WhitespaceTokenizer).unwrap();
        assert_eq!(chunks[0].text, "one two three. ");
        assert_eq!(chunks[1].novel_text(), "four five six seven eight ");
    }

    #[test]
    fn multibyte_text_tiles() {
        let text = "héllo wörld ünïcode ✓ test 日本 語 text end";
        let chunks = chunk(text, 3, 1, &WhitespaceTokenizer).unwrap();
        let mut rebuilt = chunks[0].text.clone();
        for c in &chunks[1..] {
            rebuilt.push_str(c.novel_text());
        }
        assert_eq!(rebuilt, text);
    }
}
