#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Integration tests for enrichment and search on top of LanceDB
//!
//! No Ollama server is needed; a deterministic pipeline stands in for it.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use recipe_vault::Result;
use recipe_vault::config::{Config, OllamaConfig};
use recipe_vault::database::lancedb::LanceEmbeddingStore;
use recipe_vault::database::sqlite::{Database, NewRecipe, NewVersion};
use recipe_vault::embeddings::EmbeddingStore;
use recipe_vault::enrichment::EnrichmentPipeline;
use recipe_vault::search::MatchSource;
use recipe_vault::service::{RecipeService, ServiceSettings};

const DIMENSION: usize = 64;

/// Hashes words into a fixed-size bag-of-words vector.
struct BagOfWords;

#[async_trait]
impl EnrichmentPipeline for BagOfWords {
    async fn summarize(&self, title: &str, _content: &str) -> Result<String> {
        Ok(format!("Summary of {title}"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; DIMENSION];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let bucket = word
                .bytes()
                .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(usize::from(b)));
            vector[bucket % DIMENSION] += 1.0;
        }
        Ok(vector)
    }

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }
}

async fn open_service(temp_dir: &TempDir) -> (RecipeService, Arc<LanceEmbeddingStore>) {
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ollama: OllamaConfig {
            embedding_dimension: u32::try_from(DIMENSION).expect("dimension fits"),
            ..OllamaConfig::default()
        },
        ..Config::default()
    };
    let database = Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .expect("should open database");
    let store = Arc::new(
        LanceEmbeddingStore::from_config(&config)
            .await
            .expect("should open vector store"),
    );
    let service = RecipeService::new(
        database,
        Arc::clone(&store) as Arc<dyn EmbeddingStore>,
        Arc::new(BagOfWords),
        ServiceSettings::from(&config),
    );
    (service, store)
}

#[tokio::test]
async fn processed_versions_are_searchable() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let (service, store) = open_service(&temp_dir).await;

    let (soup, v1) = service
        .create_recipe(&NewRecipe {
            short_id: "miso".to_string(),
            title: "Miso soup".to_string(),
            content: "Dissolve miso paste into dashi with tofu and wakame.".to_string(),
            tags: vec!["japanese".to_string()],
            projects: Vec::new(),
        })
        .await
        .expect("should create");
    service
        .create_recipe(&NewRecipe {
            short_id: "brownies".to_string(),
            title: "Fudgy brownies".to_string(),
            content: "Melt butter and chocolate, whisk in eggs and sugar.".to_string(),
            tags: Vec::new(),
            projects: Vec::new(),
        })
        .await
        .expect("should create");

    let report = service
        .processor()
        .process_pending()
        .await
        .expect("should process");
    assert_eq!(report.completed, 2);
    assert_eq!(store.count().await.expect("should count"), 2);

    let hits = service
        .search_recipes("miso soup with tofu", None)
        .await
        .expect("should search");
    assert_eq!(hits[0].short_id, "miso");
    assert_eq!(hits[0].source, MatchSource::Vector);
    assert_eq!(hits[0].summary.as_deref(), Some("Summary of Miso soup"));

    let v2 = service
        .save_recipe(
            soup.id,
            &NewVersion {
                title: "Miso soup".to_string(),
                content: "Dissolve white miso into dashi, add silken tofu and scallions."
                    .to_string(),
                tags: vec!["japanese".to_string()],
                projects: Vec::new(),
            },
        )
        .await
        .expect("should save");
    service
        .processor()
        .process_pending()
        .await
        .expect("should process v2");

    let current = store.list_current().await.expect("should list");
    assert_eq!(current.len(), 2);
    assert!(current.iter().any(|entry| entry.version_id == v2.id));
    let retired = store
        .get(v1.id)
        .await
        .expect("should read")
        .expect("v1 embedding kept");
    assert!(!retired.is_current);

    let check = service.consistency().check().await.expect("should check");
    assert!(check.is_consistent, "issues: {:?}", check.issues);
}
