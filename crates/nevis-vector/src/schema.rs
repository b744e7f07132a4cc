use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const VECTOR_COLUMN: &str = "vector";

pub fn build_chunk_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("document_id", DataType::Utf8, false),
		Field::new("client_id", DataType::Utf8, false),
		Field::new("chunk_index", DataType::UInt32, false),
		Field::new("content", DataType::Utf8, false),
		Field::new("start_byte", DataType::UInt64, false),
		Field::new("end_byte", DataType::UInt64, false),
		Field::new("token_count", DataType::UInt32, false),
		Field::new("overlap_tokens", DataType::UInt32, false),
		Field::new("novel_offset", DataType::UInt64, false),
		Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true),
	]))
}
