
use super::{TABLE_NAME, embedding_schema, schema_dimension};
use crate::config::Config;
use crate::embeddings::{EmbeddingEntry, EmbeddingRecord, EmbeddingStore, SimilarityHit};
use crate::{RecipeError, Result};
use arrow::array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator,
    StringArray,
};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// LanceDB-backed [`EmbeddingStore`]
pub struct LanceEmbeddingStore {
    connection: Connection,
    table_name: String,
    dimension: usize,
    /// Serializes the delete/retire/insert sequence of an upsert.
    write_lock: Mutex<()>,
}

fn lance_error(action: &str, error: impl std::fmt::Display) -> RecipeError {
    RecipeError::Embedding(format!("Failed to {action}: {error}"))
}

impl LanceEmbeddingStore {
    /// Open (or create) the vector database under the configured base directory.
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let dimension = usize::try_from(config.ollama.embedding_dimension).map_err(|_| {
            RecipeError::Config("embedding dimension does not fit in usize".to_string())
        })?;
        Self::open(&config.vector_database_path(), dimension).await
    }

    #[inline]
    pub async fn open(db_path: &Path, dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path)?;
        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| lance_error("connect to LanceDB", e))?;

        let store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            dimension,
            write_lock: Mutex::new(()),
        };
        store.initialize_table().await?;

        info!("Vector store initialized with {} dimensions", dimension);
        Ok(store)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Create the table, or recreate it when the stored dimension no longer matches.
    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| lance_error("list tables", e))?;

        if table_names.contains(&self.table_name) {
            let table = self.open_table().await?;
            let schema = table
                .schema()
                .await
                .map_err(|e| lance_error("read table schema", e))?;

            match schema_dimension(&schema) {
                Some(existing) if existing == self.dimension => {
                    debug!("Embeddings table already exists with {} dimensions", existing);
                    return Ok(());
                }
                existing => {
                    let rows = table
                        .count_rows(None)
                        .await
                        .map_err(|e| lance_error("count rows", e))?;
                    warn!(
                        "Embeddings table has dimension {:?}, configured {}; dropping {} stored embeddings",
                        existing, self.dimension, rows
                    );
                    self.connection
                        .drop_table(&self.table_name)
                        .await
                        .map_err(|e| lance_error("drop table", e))?;
                }
            }
        }

        self.connection
            .create_empty_table(&self.table_name, embedding_schema(self.dimension)?)
            .execute()
            .await
            .map_err(|e| lance_error("create table", e))?;

        info!(
            "Embeddings table created with {} dimensions",
            self.dimension
        );
        Ok(())
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| lance_error("open table", e))
    }

    fn create_record_batch(&self, record: &EmbeddingRecord) -> Result<RecordBatch> {
        let schema = embedding_schema(self.dimension)?;
        let list_size = i32::try_from(self.dimension)
            .map_err(|e| lance_error("size vector column", e))?;

        let values_array = Float32Array::from(record.vector.clone());
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, list_size, Arc::new(values_array), None)
                .map_err(|e| lance_error("create vector array", e))?;

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(vec![id.as_str()])),
            Arc::new(Int64Array::from(vec![record.version_id])),
            Arc::new(Int64Array::from(vec![record.recipe_id])),
            Arc::new(vector_array),
            Arc::new(BooleanArray::from(vec![record.is_current])),
            Arc::new(StringArray::from(vec![created_at.as_str()])),
        ];

        RecordBatch::try_new(schema, arrays).map_err(|e| lance_error("create record batch", e))
    }

    async fn query_entries(&self, predicate: String) -> Result<Vec<EmbeddingEntry>> {
        let table = self.open_table().await?;
        let mut results = table
            .query()
            .only_if(predicate)
            .execute()
            .await
            .map_err(|e| lance_error("execute query", e))?;

        let mut entries = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| lance_error("read result stream", e))?
        {
            let version_ids = typed_column::<Int64Array>(&batch, "version_id")?;
            let recipe_ids = typed_column::<Int64Array>(&batch, "recipe_id")?;
            let currents = typed_column::<BooleanArray>(&batch, "is_current")?;
            let created_ats = typed_column::<StringArray>(&batch, "created_at")?;

            for row in 0..batch.num_rows() {
                entries.push(EmbeddingEntry {
                    version_id: version_ids.value(row),
                    recipe_id: recipe_ids.value(row),
                    is_current: currents.value(row),
                    created_at: created_ats.value(row).to_string(),
                });
            }
        }
        Ok(entries)
    }
}

fn typed_column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RecipeError::Embedding(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RecipeError::Embedding(format!("Invalid {name} column type")))
}

#[async_trait]
impl EmbeddingStore for LanceEmbeddingStore {
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()> {
        if record.vector.len() != self.dimension {
            return Err(RecipeError::Embedding(format!(
                "vector has {} dimensions, expected {}",
                record.vector.len(),
                self.dimension
            )));
        }

        let batch = self.create_record_batch(record)?;
        let _guard = self.write_lock.lock().await;
        let table = self.open_table().await?;

        table
            .delete(&format!("version_id = {}", record.version_id))
            .await
            .map_err(|e| lance_error("replace embedding", e))?;

        if record.is_current {
            table
                .update()
                .only_if(format!(
                    "recipe_id = {} AND is_current = true",
                    record.recipe_id
                ))
                .column("is_current", "false")
                .execute()
                .await
                .map_err(|e| lance_error("retire previous embedding", e))?;
        }

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| lance_error("insert embedding", e))?;

        debug!(
            "Stored embedding for version {} (current: {})",
            record.version_id, record.is_current
        );
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityHit>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let table = self.open_table().await?;
        let mut results = table
            .vector_search(query)
            .map_err(|e| lance_error("create vector search", e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .only_if("is_current = true")
            .limit(limit)
            .execute()
            .await
            .map_err(|e| lance_error("execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| lance_error("read result stream", e))?
        {
            let version_ids = typed_column::<Int64Array>(&batch, "version_id")?;
            let recipe_ids = typed_column::<Int64Array>(&batch, "recipe_id")?;
            let distances = typed_column::<Float32Array>(&batch, "_distance")?;

            for row in 0..batch.num_rows() {
                let similarity = 1.0 - distances.value(row);
                if similarity >= threshold {
                    hits.push(SimilarityHit {
                        version_id: version_ids.value(row),
                        recipe_id: recipe_ids.value(row),
                        similarity,
                    });
                }
            }
        }

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        debug!("Vector search returned {} hits above {}", hits.len(), threshold);
        Ok(hits)
    }

    async fn get(&self, version_id: i64) -> Result<Option<EmbeddingEntry>> {
        let entries = self
            .query_entries(format!("version_id = {version_id}"))
            .await?;
        Ok(entries.into_iter().next())
    }

    async fn list_current(&self) -> Result<Vec<EmbeddingEntry>> {
        self.query_entries("is_current = true".to_string()).await
    }

    async fn count(&self) -> Result<usize> {
        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| lance_error("count rows", e))
    }

    /// Compact the table files.
    async fn optimize(&self) -> Result<()> {
        debug!("Optimizing vector database");
        let table = self.open_table().await?;
        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| lance_error("optimize table", e))?;
        info!("Vector database optimization completed");
        Ok(())
    }
}
