use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::database::sqlite::QueueStatus;
use crate::embeddings::{EmbeddingRecord, MemoryEmbeddingStore};
use crate::search::MatchSource;

/// Summarizes with a fixed template and embeds on two keywords.
struct ScriptedPipeline;

#[async_trait]
impl EnrichmentPipeline for ScriptedPipeline {
    async fn summarize(&self, title: &str, _content: &str) -> Result<String> {
        Ok(format!("A recipe for {title}"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(vec![
            if lower.contains("curry") { 1.0 } else { 0.0 },
            if lower.contains("pie") { 1.0 } else { 0.0 },
        ])
    }

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }
}

struct TestSetup {
    service: RecipeService,
    embeddings: Arc<MemoryEmbeddingStore>,
    _temp_dir: TempDir,
}

async fn create_test_setup() -> TestSetup {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should open database");
    let embeddings = Arc::new(MemoryEmbeddingStore::new());
    let mut settings = ServiceSettings::default();
    settings.processor.poll_interval = Duration::from_millis(10);
    let service = RecipeService::new(
        database,
        Arc::clone(&embeddings) as Arc<dyn EmbeddingStore>,
        Arc::new(ScriptedPipeline),
        settings,
    );
    TestSetup {
        service,
        embeddings,
        _temp_dir: temp_dir,
    }
}

fn new_recipe(short_id: &str, title: &str, content: &str) -> NewRecipe {
    NewRecipe {
        short_id: short_id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        tags: vec!["dinner".to_string()],
        projects: vec!["Weeknight".to_string()],
    }
}

fn edit(title: &str, content: &str) -> NewVersion {
    NewVersion {
        title: title.to_string(),
        content: content.to_string(),
        tags: Vec::new(),
        projects: Vec::new(),
    }
}

#[tokio::test]
async fn every_version_write_is_queued() {
    let setup = create_test_setup().await;
    let service = &setup.service;

    let (recipe, v1) = service
        .create_recipe(&new_recipe("curry", "Green curry", "Simmer the paste."))
        .await
        .expect("should create");
    let v2 = service
        .save_recipe(recipe.id, &edit("Green curry", "Simmer longer."))
        .await
        .expect("should save");
    let v3 = service
        .revert_recipe(recipe.id, 1)
        .await
        .expect("should revert");

    for version in [&v1, &v2, &v3] {
        let item = service
            .queue()
            .active_for_version(version.id)
            .await
            .expect("should query queue")
            .expect("version should be queued");
        assert_eq!(item.short_id, "curry");
        assert_eq!(item.status, QueueStatus::Pending);
    }
    assert_eq!(v3.version_number, 3);
    assert_eq!(v3.content, v1.content);
}

#[tokio::test]
async fn processed_recipe_is_searchable_by_vector() {
    let setup = create_test_setup().await;
    let service = &setup.service;

    service
        .create_recipe(&new_recipe("curry", "Green curry", "Simmer the paste."))
        .await
        .expect("should create");
    service
        .create_recipe(&new_recipe("pie", "Apple pie", "Bake until golden."))
        .await
        .expect("should create");

    let report = service
        .processor()
        .process_pending()
        .await
        .expect("should process");
    assert_eq!(report.completed, 2);
    assert_eq!(setup.embeddings.count().await.expect("should count"), 2);

    let details = service.get_recipe("CURRY").await.expect("should read");
    let current = details.current.expect("should have a current version");
    assert_eq!(current.ai_summary.as_deref(), Some("A recipe for Green curry"));

    let hits = service
        .search_recipes("a mild curry", None)
        .await
        .expect("should search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].short_id, "curry");
    assert_eq!(hits[0].source, MatchSource::Vector);

    let filtered = service
        .search_recipes("a mild curry", Some("Holidays"))
        .await
        .expect("should search");
    assert!(filtered.is_empty());

    let report = service.consistency().check().await.expect("should check");
    assert!(report.is_consistent);
}

#[tokio::test]
async fn failed_enqueue_keeps_the_version() {
    let setup = create_test_setup().await;
    let service = &setup.service;
    let (recipe, _) = service
        .create_recipe(&new_recipe("curry", "Green curry", "Simmer the paste."))
        .await
        .expect("should create");

    sqlx::query("DROP TABLE queue_items")
        .execute(service.database().pool())
        .await
        .expect("should drop queue table");

    let v2 = service
        .save_recipe(recipe.id, &edit("Green curry", "Use coconut cream."))
        .await
        .expect("save should succeed without the queue");
    let details = service.get_recipe("curry").await.expect("should read");
    assert_eq!(details.current.map(|v| v.id), Some(v2.id));
}

#[tokio::test]
async fn reindex_requeues_current_version() {
    let setup = create_test_setup().await;
    let service = &setup.service;
    let (recipe, v1) = service
        .create_recipe(&new_recipe("curry", "Green curry", "Simmer the paste."))
        .await
        .expect("should create");
    service
        .processor()
        .process_pending()
        .await
        .expect("should process");

    let item = service.reindex(recipe.id).await.expect("should reindex");
    assert_eq!(item.version_id, v1.id);
    assert_eq!(item.status, QueueStatus::Pending);

    let again = service.reindex(recipe.id).await.expect("should reindex");
    assert_eq!(again.id, item.id);

    service
        .delete_recipe(recipe.id)
        .await
        .expect("should delete");
    let result = service.reindex(recipe.id).await;
    assert!(matches!(result, Err(RecipeError::NotFound(_))));
}

#[tokio::test]
async fn pass_through_operations() {
    let setup = create_test_setup().await;
    let service = &setup.service;
    let (recipe, _) = service
        .create_recipe(&new_recipe("curry", "Green curry", "Simmer the paste."))
        .await
        .expect("should create");
    service
        .save_recipe(recipe.id, &edit("Green curry", "Add basil."))
        .await
        .expect("should save");

    let renamed = service
        .update_metadata(
            recipe.id,
            &RecipeMetadataUpdate {
                title: Some("Thai green curry".to_string()),
                short_id: Some("thai-curry".to_string()),
            },
        )
        .await
        .expect("should rename");
    assert_eq!(renamed.short_id, "thai-curry");

    service
        .delete_version(recipe.id, 1)
        .await
        .expect("should delete v1");
    let history = service
        .versions()
        .list_versions(recipe.id)
        .await
        .expect("should list");
    assert_eq!(history.len(), 1);

    service
        .delete_recipe(recipe.id)
        .await
        .expect("should delete");
    assert!(matches!(
        service.get_recipe("thai-curry").await,
        Err(RecipeError::NotFound(_))
    ));

    service
        .restore_recipe(recipe.id)
        .await
        .expect("should restore");
    let details = service.get_recipe("thai-curry").await.expect("should read");
    assert_eq!(details.recipe.title, "Thai green curry");
}

#[tokio::test]
async fn from_config_opens_every_store() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };

    let service = RecipeService::from_config(&config)
        .await
        .expect("should open service");
    assert!(config.database_path().exists());
    assert!(config.vector_database_path().exists());
    assert_eq!(
        service.settings().search.default_limit,
        config.search.default_limit
    );
}

#[tokio::test]
async fn optimize_keeps_recipes_and_vectors() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    let service = RecipeService::from_config(&config)
        .await
        .expect("should open service");

    let (recipe, version) = service
        .create_recipe(&new_recipe("pie", "Apple pie", "Bake until golden."))
        .await
        .expect("should create");
    let dimension =
        usize::try_from(config.ollama.embedding_dimension).expect("dimension fits in usize");
    service
        .embeddings()
        .upsert(&EmbeddingRecord {
            version_id: version.id,
            recipe_id: recipe.id,
            vector: vec![0.5; dimension],
            is_current: true,
        })
        .await
        .expect("should store embedding");
    service
        .delete_recipe(recipe.id)
        .await
        .expect("should delete");
    service
        .restore_recipe(recipe.id)
        .await
        .expect("should restore");

    service.optimize().await.expect("should optimize");

    let details = service.get_recipe("pie").await.expect("should read");
    assert_eq!(details.recipe.id, recipe.id);
    assert_eq!(service.embeddings().count().await.expect("should count"), 1);
}
