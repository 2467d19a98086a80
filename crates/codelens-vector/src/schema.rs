use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Chunk table layout. `metadata` holds the serialized `ChunkMetadata` and is
/// the source of truth other stores are rebuilt from.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("file_path", DataType::Utf8, false),
        Field::new("kind", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}
