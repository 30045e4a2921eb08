// Database module
// SQLite holds recipes, versions and the enrichment queue; LanceDB holds version embeddings

pub mod lancedb;
pub mod sqlite;

pub use lancedb::LanceEmbeddingStore;
pub use sqlite::*;
