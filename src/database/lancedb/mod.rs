// LanceDB vector database module
// Stores one embedding per recipe version with an is_current flag

#[cfg(test)]
mod tests;

pub mod vector_store;

pub use vector_store::LanceEmbeddingStore;

use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

use crate::{RecipeError, Result};

pub const TABLE_NAME: &str = "embeddings";

/// Arrow schema of the embeddings table for vectors of `dimension` floats.
#[inline]
pub fn embedding_schema(dimension: usize) -> Result<Arc<Schema>> {
    let list_size = i32::try_from(dimension).map_err(|_| {
        RecipeError::Embedding(format!("Vector dimension {dimension} is too large"))
    })?;

    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("version_id", DataType::Int64, false),
        Field::new("recipe_id", DataType::Int64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                list_size,
            ),
            false,
        ),
        Field::new("is_current", DataType::Boolean, false),
        Field::new("created_at", DataType::Utf8, false),
    ])))
}

/// Vector dimension declared by a schema, if it has a fixed-size `vector` column.
#[inline]
pub fn schema_dimension(schema: &Schema) -> Option<usize> {
    schema.fields().iter().find_map(|field| {
        if field.name() != "vector" {
            return None;
        }
        match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        }
    })
}
