use anyhow::{anyhow, Result};
use arrow_array::cast::AsArray;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, StringArray};
use std::sync::Arc;

use codelens_core::types::{ChunkMetadata, CodeChunk};

use crate::schema::build_chunk_schema;

pub fn chunks_to_record_batch(chunks: &[CodeChunk], vectors: &[Vec<f32>], dim: i32) -> Result<RecordBatch> {
    if chunks.len() != vectors.len() {
        return Err(anyhow!("chunks ({}) and vectors ({}) length mismatch", chunks.len(), vectors.len()));
    }
    let mut ids = Vec::with_capacity(chunks.len());
    let mut paths = Vec::with_capacity(chunks.len());
    let mut kinds = Vec::with_capacity(chunks.len());
    let mut metas = Vec::with_capacity(chunks.len());
    let mut vecs: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
    for (chunk, vector) in chunks.iter().zip(vectors) {
        if vector.len() != dim as usize {
            return Err(anyhow!("vector for {} has dim {}, table expects {}", chunk.chunk_id, vector.len(), dim));
        }
        ids.push(chunk.chunk_id.clone());
        paths.push(chunk.metadata.file_path.clone());
        kinds.push(chunk.metadata.kind.as_str().to_string());
        metas.push(serde_json::to_string(&chunk.metadata)?);
        vecs.push(Some(vector.iter().map(|&x| Some(x)).collect()));
    }
    let record_batch = RecordBatch::try_new(build_chunk_schema(dim), vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(paths)),
        Arc::new(StringArray::from(kinds)),
        Arc::new(StringArray::from(metas)),
        Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vecs.into_iter(), dim)),
    ])?;
    Ok(record_batch)
}

pub(crate) fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn metadata_at(batch: &RecordBatch, row: usize) -> Result<ChunkMetadata> {
    Ok(serde_json::from_str(string_column(batch, "metadata")?.value(row))?)
}

pub(crate) fn vector_at(batch: &RecordBatch, row: usize) -> Result<Option<Vec<f32>>> {
    let col = batch
        .column_by_name("vector")
        .and_then(|c| c.as_fixed_size_list_opt())
        .ok_or_else(|| anyhow!("vector column missing"))?;
    if !col.is_valid(row) { return Ok(None); }
    let list = col.value(row);
    let values = list
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow!("vector items are not f32"))?;
    Ok(Some(values.values().to_vec()))
}

/// Similarity from lance's `_distance` column under the cosine metric.
pub(crate) fn score_at(batch: &RecordBatch, row: usize) -> f32 {
    batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .map(|d| 1.0 - d.value(row))
        .unwrap_or(0.0)
}
