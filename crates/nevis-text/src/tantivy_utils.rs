use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{TextAnalyzer, WhitespaceTokenizer};
use tantivy::Index;

use nevis_core::analysis::{english_analyzer, ANALYZER_NAME};
use nevis_core::trigram::Trigrams;

pub const TRIGRAM_TOKENIZER: &str = "trigram_terms";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	let _chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
	let _document_id_field = schema_builder.add_text_field("document_id", STRING | STORED);
	let _client_id_field = schema_builder.add_text_field("client_id", STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(ANALYZER_NAME).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	let _text_field = schema_builder.add_text_field("text", text_options);
	let trigram_indexing = TextFieldIndexing::default().set_tokenizer(TRIGRAM_TOKENIZER).set_index_option(IndexRecordOption::Basic);
	let _trigram_field = schema_builder.add_text_field("trigrams", TextOptions::default().set_indexing_options(trigram_indexing));
	schema_builder.build()
}

pub fn register_tokenizers(index: &Index) {
	index.tokenizers().register(ANALYZER_NAME, english_analyzer());
	index.tokenizers().register(TRIGRAM_TOKENIZER, TextAnalyzer::builder(WhitespaceTokenizer::default()).build());
}

/// Trigrams as single index terms: blanks become `_` so whitespace
/// tokenization keeps each trigram whole.
pub fn trigram_terms(trigrams: &Trigrams) -> Vec<String> {
	trigrams.iter().map(|t| t.replace(' ', "_")).collect()
}

/// The value stored in the `trigrams` field for `text`.
pub fn trigram_field_value(text: &str) -> String {
	trigram_terms(&Trigrams::of(text)).join(" ")
}
