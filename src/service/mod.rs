// Service module
// Wires storage, queue, enrichment and search into one application object

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::consistency::ConsistencyValidator;
use crate::database::lancedb::LanceEmbeddingStore;
use crate::database::sqlite::{
    Database, NewQueueItem, NewRecipe, NewVersion, QueueItem, Recipe, RecipeDetails,
    RecipeMetadataUpdate, RecipeVersion,
};
use crate::embeddings::{EmbeddingStore, OllamaPipeline};
use crate::enrichment::{EnrichmentPipeline, ProcessorSettings, QueueProcessor};
use crate::queue::{EnrichmentQueue, QueueConfig};
use crate::search::{SearchHit, SearchService, SearchSettings};
use crate::versions::{SqliteRecipeRepository, VersionStore};
use crate::{RecipeError, Result};

/// Tunables for the pieces owned by [`RecipeService`]
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub processor: ProcessorSettings,
    pub search: SearchSettings,
    pub queue: QueueConfig,
}

impl Default for ServiceSettings {
    #[inline]
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServiceSettings {
    #[inline]
    fn from(config: &Config) -> Self {
        Self {
            processor: ProcessorSettings::from(&config.processor),
            search: SearchSettings::from(&config.search),
            queue: config.queue_config(),
        }
    }
}

/// The recipe vault application.
///
/// Every write that produces a version also enqueues it for enrichment. A
/// failed enqueue is logged and leaves the committed version in place;
/// [`reindex`](Self::reindex) queues it again.
pub struct RecipeService {
    database: Database,
    versions: Arc<VersionStore>,
    queue: EnrichmentQueue,
    embeddings: Arc<dyn EmbeddingStore>,
    pipeline: Arc<dyn EnrichmentPipeline>,
    search: SearchService,
    settings: ServiceSettings,
}

impl RecipeService {
    #[inline]
    pub fn new(
        database: Database,
        embeddings: Arc<dyn EmbeddingStore>,
        pipeline: Arc<dyn EnrichmentPipeline>,
        settings: ServiceSettings,
    ) -> Self {
        let versions = Arc::new(VersionStore::new(Arc::new(SqliteRecipeRepository::new(
            database.clone(),
        ))));
        let queue = EnrichmentQueue::new(database.clone(), settings.queue.clone());
        let search = SearchService::new(
            Arc::clone(&versions),
            Arc::clone(&embeddings),
            Arc::clone(&pipeline),
            settings.search,
        );

        Self {
            database,
            versions,
            queue,
            embeddings,
            pipeline,
            search,
            settings,
        }
    }

    /// Open SQLite, LanceDB and the Ollama pipeline described by `config`.
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir()).await?;
        let embeddings = LanceEmbeddingStore::from_config(config).await?;
        let pipeline = OllamaPipeline::new(&config.ollama)?;

        info!("Opened recipe vault at {}", config.get_base_dir().display());
        Ok(Self::new(
            database,
            Arc::new(embeddings),
            Arc::new(pipeline),
            ServiceSettings::from(config),
        ))
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    #[inline]
    pub fn queue(&self) -> &EnrichmentQueue {
        &self.queue
    }

    #[inline]
    pub fn embeddings(&self) -> &Arc<dyn EmbeddingStore> {
        &self.embeddings
    }

    #[inline]
    pub fn search(&self) -> &SearchService {
        &self.search
    }

    #[inline]
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    async fn enqueue(&self, short_id: &str, version: &RecipeVersion) -> Option<QueueItem> {
        let item = NewQueueItem {
            title: version.title.clone(),
            short_id: short_id.to_string(),
            version_id: version.id,
        };
        match self.queue.add(&item).await {
            Ok(queued) => {
                debug!(
                    "Queued {} {} for enrichment (item {})",
                    short_id,
                    version.version_label(),
                    queued.id
                );
                Some(queued)
            }
            Err(e) => {
                warn!(
                    "Failed to queue {} {} for enrichment: {}",
                    short_id,
                    version.version_label(),
                    e
                );
                None
            }
        }
    }

    #[inline]
    pub async fn create_recipe(&self, recipe: &NewRecipe) -> Result<(Recipe, RecipeVersion)> {
        let (recipe, version) = self.versions.create(recipe).await?;
        self.enqueue(&recipe.short_id, &version).await;
        Ok((recipe, version))
    }

    #[inline]
    pub async fn save_recipe(&self, recipe_id: i64, version: &NewVersion) -> Result<RecipeVersion> {
        let saved = self.versions.save(recipe_id, version).await?;
        let short_id = self.short_id_of(recipe_id).await?;
        self.enqueue(&short_id, &saved).await;
        Ok(saved)
    }

    #[inline]
    pub async fn revert_recipe(&self, recipe_id: i64, version_number: i64) -> Result<RecipeVersion> {
        let reverted = self.versions.revert(recipe_id, version_number).await?;
        let short_id = self.short_id_of(recipe_id).await?;
        self.enqueue(&short_id, &reverted).await;
        Ok(reverted)
    }

    /// Queue the current version again, e.g. after a failed enqueue or a model change.
    #[inline]
    pub async fn reindex(&self, recipe_id: i64) -> Result<QueueItem> {
        let details = self.versions.read(recipe_id).await?;
        let current = details.current.ok_or_else(|| {
            RecipeError::NotFound(format!("current version of recipe {recipe_id}"))
        })?;

        let item = NewQueueItem {
            title: current.title.clone(),
            short_id: details.recipe.short_id.clone(),
            version_id: current.id,
        };
        let queued = self.queue.add(&item).await?;
        info!(
            "Reindexing {} {} (queue item {})",
            details.recipe.short_id,
            current.version_label(),
            queued.id
        );
        Ok(queued)
    }

    /// Compact the SQLite file and the embedding store.
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        self.database.optimize().await?;
        self.embeddings.optimize().await
    }

    async fn short_id_of(&self, recipe_id: i64) -> Result<String> {
        Ok(self.versions.read(recipe_id).await?.recipe.short_id)
    }

    #[inline]
    pub async fn update_metadata(
        &self,
        recipe_id: i64,
        update: &RecipeMetadataUpdate,
    ) -> Result<Recipe> {
        self.versions.update_metadata(recipe_id, update).await
    }

    #[inline]
    pub async fn delete_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        self.versions.delete_recipe(recipe_id).await
    }

    #[inline]
    pub async fn restore_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        self.versions.restore(recipe_id).await
    }

    #[inline]
    pub async fn delete_version(&self, recipe_id: i64, version_number: i64) -> Result<()> {
        self.versions.delete_version(recipe_id, version_number).await
    }

    /// Read-only lookup by numeric id or short id.
    #[inline]
    pub async fn get_recipe(&self, id_or_short_id: &str) -> Result<RecipeDetails> {
        let recipe = self.versions.resolve(id_or_short_id).await?;
        self.versions.read(recipe.id).await
    }

    /// Hybrid search with the configured default limit.
    #[inline]
    pub async fn search_recipes(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        self.search
            .hybrid_search_in(query, self.settings.search.default_limit, project)
            .await
    }

    #[inline]
    pub fn processor(&self) -> Arc<QueueProcessor> {
        Arc::new(QueueProcessor::new(
            self.queue.clone(),
            Arc::clone(&self.versions),
            Arc::clone(&self.embeddings),
            Arc::clone(&self.pipeline),
            self.settings.processor,
        ))
    }

    #[inline]
    pub fn consistency(&self) -> ConsistencyValidator {
        ConsistencyValidator::new(Arc::clone(&self.versions), Arc::clone(&self.embeddings))
    }
}
