// Enrichment module
// Pipeline boundary for summaries and embeddings plus the queue processor that drives it

pub mod pipeline;
pub mod processor;

pub use pipeline::{CHARS_PER_TOKEN, EnrichmentPipeline, prepare_embedding_input};
pub use processor::{
    ProcessReport, ProcessorHandle, ProcessorSettings, QueueProcessor, TickOutcome,
};
