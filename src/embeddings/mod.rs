// Embeddings module
// Vector storage abstraction and the Ollama-backed enrichment adapter

pub mod ollama;
pub mod store;

pub use ollama::{OllamaClient, OllamaPipeline};
pub use store::{
    EmbeddingEntry, EmbeddingRecord, EmbeddingStore, MemoryEmbeddingStore, SimilarityHit,
    cosine_similarity,
};
