#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! End-to-end scenarios for the recipe vault
//!
//! These tests drive the public service API against an on-disk SQLite database,
//! the in-memory embedding store and a scripted enrichment pipeline:
//! - Version chain invariants across create, save, revert and version deletes
//! - Idempotent enqueueing and exclusive claims under concurrent consumers
//! - Enrichment success, failure and retry
//! - Hybrid search fallback to text

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use recipe_vault::database::sqlite::{
    Database, NewQueueItem, NewRecipe, NewVersion, QueueStatus, RecipeVersion,
};
use recipe_vault::embeddings::{EmbeddingStore, MemoryEmbeddingStore};
use recipe_vault::enrichment::{EnrichmentPipeline, TickOutcome};
use recipe_vault::search::MatchSource;
use recipe_vault::service::{RecipeService, ServiceSettings};
use recipe_vault::{RecipeError, Result};

/// Pipeline whose next `failures` calls to summarize fail with "timeout".
#[derive(Default)]
struct ScriptedPipeline {
    failures: AtomicUsize,
}

#[async_trait]
impl EnrichmentPipeline for ScriptedPipeline {
    async fn summarize(&self, title: &str, _content: &str) -> Result<String> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RecipeError::Processing("timeout".to_string()));
        }
        Ok(format!("**{title}**: a dependable recipe."))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(["soup", "bread", "cake"]
            .iter()
            .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
            .collect())
    }

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }
}

struct Vault {
    service: RecipeService,
    embeddings: Arc<MemoryEmbeddingStore>,
    pipeline: Arc<ScriptedPipeline>,
    _temp_dir: TempDir,
}

async fn open_vault() -> Vault {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should open database");
    let embeddings = Arc::new(MemoryEmbeddingStore::new());
    let pipeline = Arc::new(ScriptedPipeline::default());

    let mut settings = ServiceSettings::default();
    settings.processor.poll_interval = Duration::from_millis(10);
    settings.processor.pipeline_timeout = Duration::from_secs(5);

    let service = RecipeService::new(
        database,
        Arc::clone(&embeddings) as Arc<dyn EmbeddingStore>,
        Arc::clone(&pipeline) as Arc<dyn EnrichmentPipeline>,
        settings,
    );
    Vault {
        service,
        embeddings,
        pipeline,
        _temp_dir: temp_dir,
    }
}

fn recipe(short_id: &str, title: &str, content: &str) -> NewRecipe {
    NewRecipe {
        short_id: short_id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        tags: Vec::new(),
        projects: Vec::new(),
    }
}

fn content(title: &str, body: &str) -> NewVersion {
    NewVersion {
        title: title.to_string(),
        content: body.to_string(),
        tags: Vec::new(),
        projects: Vec::new(),
    }
}

async fn all_versions(vault: &Vault, recipe_id: i64) -> Vec<RecipeVersion> {
    vault
        .service
        .versions()
        .repository()
        .list_versions(recipe_id, true)
        .await
        .expect("should list versions")
}

async fn assert_single_current(vault: &Vault, recipe_id: i64) -> RecipeVersion {
    let versions = all_versions(vault, recipe_id).await;
    let current: Vec<_> = versions.iter().filter(|v| v.is_current).collect();
    assert_eq!(current.len(), 1, "exactly one version must be current");

    let details = vault
        .service
        .versions()
        .read(recipe_id)
        .await
        .expect("should read recipe");
    assert_eq!(details.recipe.current_version_id, Some(current[0].id));
    current[0].clone()
}

#[tokio::test]
async fn save_moves_the_current_version() {
    let vault = open_vault().await;
    let (created, v1) = vault
        .service
        .create_recipe(&recipe("a", "A", "X"))
        .await
        .expect("should create");
    assert_eq!(v1.version_number, 1);
    assert!(v1.is_current);

    let v2 = vault
        .service
        .save_recipe(created.id, &content("A", "Y"))
        .await
        .expect("should save");
    assert_eq!(v2.version_number, 2);

    let current = assert_single_current(&vault, created.id).await;
    assert_eq!(current.id, v2.id);
    let old = vault
        .service
        .versions()
        .get_version_by_id(v1.id)
        .await
        .expect("v1 is kept");
    assert!(!old.is_current);
}

#[tokio::test]
async fn identical_resave_is_rejected() {
    let vault = open_vault().await;
    let (created, _) = vault
        .service
        .create_recipe(&recipe("a", "A", "X"))
        .await
        .expect("should create");

    vault
        .service
        .save_recipe(created.id, &content("A", "Y"))
        .await
        .expect("first save creates v2");
    let second = vault
        .service
        .save_recipe(created.id, &content("A", "Y"))
        .await;

    assert!(matches!(second, Err(RecipeError::NoChange { recipe_id }) if recipe_id == created.id));
    assert_eq!(all_versions(&vault, created.id).await.len(), 2);
}

#[tokio::test]
async fn revert_appends_a_copy() {
    let vault = open_vault().await;
    let (created, v1) = vault
        .service
        .create_recipe(&recipe("a", "A", "X"))
        .await
        .expect("should create");
    vault
        .service
        .save_recipe(created.id, &content("A", "Y"))
        .await
        .expect("should save");

    let v3 = vault
        .service
        .revert_recipe(created.id, 1)
        .await
        .expect("should revert");
    assert_eq!(v3.version_number, 3);
    assert_eq!(v3.content, "X");

    let original = vault
        .service
        .versions()
        .get_version(created.id, 1)
        .await
        .expect("v1 untouched");
    assert_eq!(original.id, v1.id);
    assert_eq!(original.content, "X");
    assert!(!original.is_current);
    assert_single_current(&vault, created.id).await;
}

#[tokio::test]
async fn version_numbers_are_never_reused() {
    let vault = open_vault().await;
    let (created, _) = vault
        .service
        .create_recipe(&recipe("a", "A", "one"))
        .await
        .expect("should create");
    vault
        .service
        .save_recipe(created.id, &content("A", "two"))
        .await
        .expect("should save v2");
    vault
        .service
        .save_recipe(created.id, &content("A", "three"))
        .await
        .expect("should save v3");

    vault
        .service
        .delete_version(created.id, 3)
        .await
        .expect_err("current version cannot be deleted");
    vault
        .service
        .delete_version(created.id, 2)
        .await
        .expect("should delete v2");

    let v4 = vault
        .service
        .save_recipe(created.id, &content("A", "four"))
        .await
        .expect("should save v4");
    assert_eq!(v4.version_number, 4);

    let numbers: Vec<i64> = all_versions(&vault, created.id)
        .await
        .iter()
        .map(|v| v.version_number)
        .collect();
    let unique: HashSet<i64> = numbers.iter().copied().collect();
    assert_eq!(unique.len(), numbers.len());
}

#[tokio::test]
async fn concurrent_saves_get_distinct_numbers() {
    let vault = Arc::new(open_vault().await);
    let (created, _) = vault
        .service
        .create_recipe(&recipe("a", "A", "base"))
        .await
        .expect("should create");

    let mut tasks = Vec::new();
    for i in 0..8 {
        let vault = Arc::clone(&vault);
        tasks.push(tokio::spawn(async move {
            vault
                .service
                .save_recipe(created.id, &content("A", &format!("edit {i}")))
                .await
        }));
    }

    let mut numbers = HashSet::new();
    for task in tasks {
        let saved = task
            .await
            .expect("task should not panic")
            .expect("save should succeed");
        assert!(numbers.insert(saved.version_number));
    }
    assert_eq!(numbers, (2..=9).collect::<HashSet<i64>>());
    assert_single_current(&vault, created.id).await;
}

#[tokio::test]
async fn enqueue_is_idempotent_while_pending() {
    let vault = open_vault().await;
    let (created, v1) = vault
        .service
        .create_recipe(&recipe("a", "A", "X"))
        .await
        .expect("should create");

    let item = NewQueueItem {
        title: created.title.clone(),
        short_id: created.short_id.clone(),
        version_id: v1.id,
    };
    let first = vault.service.queue().add(&item).await.expect("should add");
    let second = vault.service.queue().add(&item).await.expect("should add");
    assert_eq!(first.id, second.id);

    let stats = vault.service.queue().stats().await.expect("should count");
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.total(), 1);
}

#[tokio::test]
async fn concurrent_claims_never_overlap() {
    let vault = open_vault().await;
    for i in 0..12 {
        vault
            .service
            .create_recipe(&recipe(&format!("r{i}"), &format!("Recipe {i}"), "body"))
            .await
            .expect("should create");
    }

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let queue = vault.service.queue().clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(item) = queue.pop_next().await.expect("should claim") {
                claimed.push(item.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.expect("task should not panic") {
            assert!(seen.insert(id), "item {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), 12);
}

#[tokio::test]
async fn enrichment_retires_the_previous_embedding() {
    let vault = open_vault().await;
    let (created, v1) = vault
        .service
        .create_recipe(&recipe("soup", "Onion soup", "Caramelize onions."))
        .await
        .expect("should create");
    let processor = vault.service.processor();
    processor
        .process_pending()
        .await
        .expect("should process v1");

    let v2 = vault
        .service
        .save_recipe(created.id, &content("Onion soup", "Add thyme."))
        .await
        .expect("should save");
    let claimed = processor.tick().await.expect("should tick");
    assert!(matches!(claimed, TickOutcome::Completed(_)));

    let item = vault
        .service
        .queue()
        .get_recent_completed(10)
        .await
        .expect("should list")
        .into_iter()
        .find(|item| item.version_id == v2.id)
        .expect("v2 item completed");
    assert_eq!(item.status, QueueStatus::Completed);
    assert!(item.completed_at.is_some());

    let enriched = vault
        .service
        .versions()
        .get_version_by_id(v2.id)
        .await
        .expect("should read v2");
    assert_eq!(
        enriched.ai_summary.as_deref(),
        Some("**Onion soup**: a dependable recipe.")
    );

    let v1_embedding = vault
        .embeddings
        .get(v1.id)
        .await
        .expect("should read")
        .expect("v1 embedding kept");
    let v2_embedding = vault
        .embeddings
        .get(v2.id)
        .await
        .expect("should read")
        .expect("v2 embedding stored");
    assert!(!v1_embedding.is_current);
    assert!(v2_embedding.is_current);

    let report = vault
        .service
        .consistency()
        .check()
        .await
        .expect("should check");
    assert!(report.is_consistent);
}

#[tokio::test]
async fn failed_enrichment_can_be_retried() {
    let vault = open_vault().await;
    vault.pipeline.failures.store(1, Ordering::SeqCst);
    let (_, v1) = vault
        .service
        .create_recipe(&recipe("bread", "Rye bread", "Proof overnight."))
        .await
        .expect("should create");

    let processor = vault.service.processor();
    let outcome = processor.tick().await.expect("tick should not fail");
    let TickOutcome::Failed(item_id) = outcome else {
        panic!("expected a failed tick, got {outcome:?}");
    };

    let errors = vault
        .service
        .queue()
        .get_recent_errors(10)
        .await
        .expect("should list errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error.as_deref(), Some("timeout"));

    let retried = vault
        .service
        .queue()
        .retry(item_id)
        .await
        .expect("should retry");
    assert_eq!(retried.status, QueueStatus::Pending);
    assert_eq!(retried.error, None);

    let outcome = processor.tick().await.expect("tick should not fail");
    assert_eq!(outcome, TickOutcome::Completed(item_id));
    assert!(
        vault
            .embeddings
            .get(v1.id)
            .await
            .expect("should read")
            .is_some()
    );
}

#[tokio::test]
async fn unenriched_recipes_are_found_by_text() {
    let vault = open_vault().await;
    vault
        .service
        .create_recipe(&recipe("cake", "Carrot cake", "Grate carrots."))
        .await
        .expect("should create");
    vault
        .service
        .processor()
        .process_pending()
        .await
        .expect("should process");
    vault
        .service
        .create_recipe(&recipe("xyz", "XYZ dumplings", "Pleat carefully."))
        .await
        .expect("should create");

    let hits = vault
        .service
        .search_recipes("xyz", None)
        .await
        .expect("should search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].short_id, "xyz");
    assert_eq!(hits[0].source, MatchSource::Text);

    let hits = vault
        .service
        .search_recipes("a cake for sunday", None)
        .await
        .expect("should search");
    assert_eq!(hits[0].short_id, "cake");
    assert_eq!(hits[0].source, MatchSource::Vector);
}
