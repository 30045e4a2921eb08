
use async_trait::async_trait;

use crate::Result;

/// Characters assumed per token when sizing the embedding input.
pub const CHARS_PER_TOKEN: usize = 4;

/// Language-model provider used to enrich a recipe version.
///
/// Failures are returned as errors and recorded against the queue item; they
/// never stop the processor.
#[async_trait]
pub trait EnrichmentPipeline: Send + Sync {
    /// Short markdown summary of a recipe.
    async fn summarize(&self, title: &str, content: &str) -> Result<String>;

    /// Fixed-dimension embedding of `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Fails when the provider is not configured well enough to ever succeed.
    fn check_ready(&self) -> Result<()>;
}

/// Text handed to [`EnrichmentPipeline::embed`] for a version: the title and
/// content, cut to the first `token_budget * CHARS_PER_TOKEN` characters.
#[inline]
pub fn prepare_embedding_input(title: &str, content: &str, token_budget: usize) -> String {
    let mut text = format!("{title}\n\n{content}");
    let max_chars = token_budget.saturating_mul(CHARS_PER_TOKEN);
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
    }
    text
}
