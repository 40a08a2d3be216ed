// LanceDB vector database module
// Arrow schema for chunk records and the generation-swapping vector index


pub mod vector_store;

pub use vector_store::LanceVectorIndex;

use arrow::array::{Array, FixedSizeListArray, Float32Array, Int64Array, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::database::vector_index::{ChunkRecord, ScoredRecord};
use crate::{KbError, Result};

const GENERATION_SEPARATOR: &str = "__g";

/// Table holding one committed generation of a collection
#[inline]
pub fn generation_table_name(collection: &str, generation: u64) -> String {
    format!("{}{}{}", collection, GENERATION_SEPARATOR, generation)
}

/// Split a table name into its collection and generation
#[inline]
pub fn parse_generation_table(table_name: &str) -> Option<(&str, u64)> {
    let (collection, generation) = table_name.rsplit_once(GENERATION_SEPARATOR)?;
    if collection.is_empty() {
        return None;
    }
    generation.parse().ok().map(|g| (collection, g))
}

/// Schema for chunk tables with vectors of the given dimension
#[inline]
pub fn chunk_schema(vector_dim: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("document_id", DataType::Int64, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("page_number", DataType::UInt32, false),
        Field::new("overlap_len", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
    ]))
}

/// Build a RecordBatch from chunk records
#[inline]
pub fn records_to_batch(records: &[ChunkRecord]) -> Result<RecordBatch> {
    let vector_dim = records
        .first()
        .map(|r| r.vector.len())
        .ok_or_else(|| KbError::VectorStore("Cannot build a batch from no records".to_string()))?;

    if vector_dim == 0 {
        return Err(KbError::VectorStore("Vectors must not be empty".to_string()));
    }

    let len = records.len();
    let mut flat_values = Vec::with_capacity(len * vector_dim);
    for record in records {
        if record.vector.len() != vector_dim {
            return Err(KbError::VectorStore(format!(
                "Record {} has dimension {}, expected {}",
                record.id,
                record.vector.len(),
                vector_dim
            )));
        }
        flat_values.extend_from_slice(&record.vector);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        vector_dim as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| KbError::VectorStore(format!("Failed to create vector array: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.id.as_str()),
        )),
        Arc::new(vector_array),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.document_id),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.chunk_index),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.page_number),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.overlap_len),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.text.as_str()),
        )),
    ];

    RecordBatch::try_new(chunk_schema(vector_dim), arrays)
        .map_err(|e| KbError::VectorStore(format!("Failed to create record batch: {}", e)))
}

/// Parse chunk records out of a result batch
#[inline]
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<ChunkRecord>> {
    let ids = column::<StringArray>(batch, "id")?;
    let vectors = column::<FixedSizeListArray>(batch, "vector")?;
    let document_ids = column::<Int64Array>(batch, "document_id")?;
    let chunk_indices = column::<UInt32Array>(batch, "chunk_index")?;
    let page_numbers = column::<UInt32Array>(batch, "page_number")?;
    let overlap_lens = column::<UInt32Array>(batch, "overlap_len")?;
    let texts = column::<StringArray>(batch, "text")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let vector_values = vectors.value(row);
        let vector = vector_values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| KbError::VectorStore("Invalid vector item type".to_string()))?
            .values()
            .to_vec();

        records.push(ChunkRecord {
            id: ids.value(row).to_string(),
            document_id: document_ids.value(row),
            chunk_index: chunk_indices.value(row),
            page_number: page_numbers.value(row),
            overlap_len: overlap_lens.value(row),
            text: texts.value(row).to_string(),
            vector,
        });
    }

    Ok(records)
}

/// Parse a vector search batch, converting cosine distance to similarity
#[inline]
pub fn batch_to_scored(batch: &RecordBatch) -> Result<Vec<ScoredRecord>> {
    let records = batch_to_records(batch)?;

    // Distance is absent only when the query was not a vector search
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok(records
        .into_iter()
        .enumerate()
        .map(|(row, record)| {
            let distance = distances
                .map_or(1.0, |d| if d.is_null(row) { 1.0 } else { d.value(row) });
            ScoredRecord {
                record,
                score: 1.0 - distance,
            }
        })
        .collect())
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| KbError::VectorStore(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| KbError::VectorStore(format!("Invalid {} column type", name)))
}
