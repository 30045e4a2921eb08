use anyhow::{Context, Result, anyhow};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::RecipeError;
use crate::config::Config;
use crate::database::sqlite::{
    NewRecipe, NewVersion, QueueItem, RecipeMetadataUpdate, RecipeVersion,
};
use crate::search::MatchSource;
use crate::service::RecipeService;

const QUEUE_LISTING_LIMIT: u32 = 20;

/// Accepts `3` or `v3`.
#[inline]
pub fn parse_version_number(value: &str) -> std::result::Result<i64, String> {
    let digits = value
        .strip_prefix('v')
        .or_else(|| value.strip_prefix('V'))
        .unwrap_or(value);
    match digits.parse::<i64>() {
        Ok(number) if number > 0 => Ok(number),
        _ => Err(format!("'{value}' is not a version number such as 3 or v3")),
    }
}

/// Read recipe content from a file, or from stdin when the path is `-`.
#[inline]
pub fn read_content(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read recipe content from stdin")?;
        return Ok(content);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read recipe file: {}", path.display()))
}

async fn open_service(base_dir: &Path) -> Result<RecipeService> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;
    RecipeService::from_config(&config)
        .await
        .context("Failed to open recipe vault")
}

async fn resolve_id(service: &RecipeService, recipe: &str) -> Result<i64> {
    let found = service
        .versions()
        .resolve(recipe)
        .await
        .with_context(|| format!("Recipe not found: {recipe}"))?;
    Ok(found.id)
}

fn print_version_line(version: &RecipeVersion) {
    let marker = if version.is_current { "*" } else { " " };
    let enriched = if version.ai_summary.is_some() {
        "summarized"
    } else {
        "not enriched"
    };
    println!(
        "{} {:<5} {}  {}  ({})",
        marker,
        version.version_label(),
        version.created_at.format("%Y-%m-%d %H:%M:%S"),
        version.title,
        enriched
    );
}

fn print_queue_item(item: &QueueItem) {
    println!(
        "  #{} {} '{}' version {} [{}] queued {}",
        item.id,
        item.short_id,
        item.title,
        item.version_id,
        item.status,
        item.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(error) = &item.error {
        println!("      ⚠️  {error}");
    }
}

/// Recipe content and labels supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct RecipeInput {
    pub title: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub projects: Vec<String>,
}

#[inline]
pub async fn add_recipe(base_dir: &Path, short_id: String, input: RecipeInput) -> Result<()> {
    let service = open_service(base_dir).await?;
    let title = input
        .title
        .ok_or_else(|| anyhow!("A title is required for a new recipe"))?;

    let (recipe, version) = service
        .create_recipe(&NewRecipe {
            short_id,
            title,
            content: input.content,
            tags: input.tags,
            projects: input.projects,
        })
        .await
        .context("Failed to create recipe")?;

    println!(
        "✅ Created '{}' ({}) at {}",
        recipe.title,
        recipe.short_id,
        version.version_label()
    );
    println!("Queued for enrichment; run 'recipe-vault process' to summarize and embed it.");
    Ok(())
}

/// Save a new version. Omitted title, tags or projects carry over from the current version.
#[inline]
pub async fn edit_recipe(base_dir: &Path, recipe: &str, input: RecipeInput) -> Result<()> {
    let service = open_service(base_dir).await?;
    let recipe_id = resolve_id(&service, recipe).await?;
    let details = service.versions().read(recipe_id).await?;
    let current = details
        .current
        .ok_or_else(|| anyhow!("Recipe {} has no current version", details.recipe.short_id))?;

    let version = NewVersion {
        title: input.title.unwrap_or_else(|| current.title.clone()),
        content: input.content,
        tags: if input.tags.is_empty() {
            current.tags.clone()
        } else {
            input.tags
        },
        projects: if input.projects.is_empty() {
            current.projects.clone()
        } else {
            input.projects
        },
    };

    match service.save_recipe(recipe_id, &version).await {
        Ok(saved) => {
            println!(
                "✅ Saved {} of {}",
                saved.version_label(),
                details.recipe.short_id
            );
            Ok(())
        }
        Err(RecipeError::NoChange { .. }) => {
            println!(
                "No changes: {} already matches the current version",
                details.recipe.short_id
            );
            Ok(())
        }
        Err(e) => Err(e).context("Failed to save recipe"),
    }
}

#[inline]
pub async fn revert_recipe(base_dir: &Path, recipe: &str, version_number: i64) -> Result<()> {
    let service = open_service(base_dir).await?;
    let recipe_id = resolve_id(&service, recipe).await?;
    let reverted = service
        .revert_recipe(recipe_id, version_number)
        .await
        .with_context(|| format!("Failed to revert {recipe} to v{version_number}"))?;

    println!(
        "✅ Reverted {} to the content of v{} as {}",
        recipe,
        version_number,
        reverted.version_label()
    );
    Ok(())
}

#[inline]
pub async fn show_recipe(base_dir: &Path, recipe: &str) -> Result<()> {
    let service = open_service(base_dir).await?;
    let details = service
        .get_recipe(recipe)
        .await
        .with_context(|| format!("Recipe not found: {recipe}"))?;

    println!("📖 {} ({})", details.recipe.title, details.recipe.short_id);
    let Some(current) = details.current else {
        println!("   No current version");
        return Ok(());
    };
    println!("   Version: {}", current.version_label());
    if !current.tags.is_empty() {
        println!("   Tags: {}", current.tags.join(", "));
    }
    if !current.projects.is_empty() {
        println!("   Projects: {}", current.projects.join(", "));
    }
    println!(
        "   Updated: {}",
        details.recipe.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(summary) = &current.ai_summary {
        println!();
        println!("Summary:");
        println!("{summary}");
    }
    println!();
    println!("{}", current.content);
    Ok(())
}

#[inline]
pub async fn show_history(base_dir: &Path, recipe: &str) -> Result<()> {
    let service = open_service(base_dir).await?;
    let recipe_id = resolve_id(&service, recipe).await?;
    let versions = service.versions().list_versions(recipe_id).await?;

    println!("History of {} ({} versions):", recipe, versions.len());
    for version in &versions {
        print_version_line(version);
    }
    Ok(())
}

#[inline]
pub async fn list_recipes(base_dir: &Path, include_deleted: bool) -> Result<()> {
    let service = open_service(base_dir).await?;
    let recipes = service.versions().list_recipes(include_deleted).await?;

    if recipes.is_empty() {
        println!("No recipes yet.");
        println!("Use 'recipe-vault add <short_id> --title <title> --file <path>' to add one.");
        return Ok(());
    }

    println!("Recipes ({} total):", recipes.len());
    for recipe in &recipes {
        let deleted = if recipe.is_deleted() { " [deleted]" } else { "" };
        println!(
            "  {:<24} {}{}  (updated {})",
            recipe.short_id,
            recipe.title,
            deleted,
            recipe.updated_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

#[inline]
pub async fn rename_recipe(
    base_dir: &Path,
    recipe: &str,
    title: Option<String>,
    short_id: Option<String>,
) -> Result<()> {
    if title.is_none() && short_id.is_none() {
        return Err(anyhow!("Nothing to rename: pass --title and/or --short-id"));
    }

    let service = open_service(base_dir).await?;
    let recipe_id = resolve_id(&service, recipe).await?;
    let renamed = service
        .update_metadata(recipe_id, &RecipeMetadataUpdate { title, short_id })
        .await
        .context("Failed to rename recipe")?;

    println!("✅ Renamed to '{}' ({})", renamed.title, renamed.short_id);
    Ok(())
}

#[inline]
pub async fn delete_recipe(base_dir: &Path, recipe: &str) -> Result<()> {
    let service = open_service(base_dir).await?;
    let recipe_id = resolve_id(&service, recipe).await?;
    let deleted = service.delete_recipe(recipe_id).await?;

    println!("🗑️  Deleted '{}' ({})", deleted.title, deleted.short_id);
    println!("Use 'recipe-vault restore {}' to undo.", deleted.short_id);
    Ok(())
}

#[inline]
pub async fn delete_version(base_dir: &Path, recipe: &str, version_number: i64) -> Result<()> {
    let service = open_service(base_dir).await?;
    let recipe_id = resolve_id(&service, recipe).await?;
    service
        .delete_version(recipe_id, version_number)
        .await
        .with_context(|| format!("Failed to delete v{version_number} of {recipe}"))?;

    println!("🗑️  Deleted v{version_number} of {recipe}");
    Ok(())
}

#[inline]
pub async fn restore_recipe(base_dir: &Path, recipe: &str) -> Result<()> {
    let service = open_service(base_dir).await?;
    let found = service
        .versions()
        .resolve_any(recipe)
        .await
        .with_context(|| format!("Recipe not found: {recipe}"))?;
    let restored = service
        .restore_recipe(found.id)
        .await
        .context("Failed to restore recipe")?;

    println!("♻️  Restored '{}' ({})", restored.title, restored.short_id);
    Ok(())
}

#[inline]
pub async fn search_recipes(
    base_dir: &Path,
    query: &str,
    project: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let service = open_service(base_dir).await?;
    let limit = limit.unwrap_or(service.settings().search.default_limit);
    let hits = service
        .search()
        .hybrid_search_in(query, limit, project)
        .await
        .context("Search failed")?;

    if hits.is_empty() {
        println!("No recipes match '{query}'.");
        return Ok(());
    }

    let via = match hits.first().map(|hit| hit.source) {
        Some(MatchSource::Vector) => "semantic match",
        _ => "text match",
    };
    println!("🔍 {} results for '{}' ({}):", hits.len(), query, via);
    for hit in &hits {
        println!();
        println!(
            "  {} ({}) v{}  score {:.2}",
            hit.title, hit.short_id, hit.version_number, hit.similarity
        );
        if let Some(summary) = &hit.summary {
            let first_line = summary.lines().next().unwrap_or_default();
            println!("     {first_line}");
        }
    }
    Ok(())
}

/// Queue inspection and maintenance actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    Status,
    Errors,
    Pending,
    Completed,
    Retry(i64),
    RetryAll,
    Cleanup,
}

#[inline]
pub async fn queue_command(base_dir: &Path, action: QueueAction) -> Result<()> {
    let service = open_service(base_dir).await?;
    let queue = service.queue();

    match action {
        QueueAction::Status => {
            let stats = queue.stats().await?;
            println!("📊 Enrichment queue");
            println!("   Pending: {}", stats.pending);
            println!("   Processing: {}", stats.processing);
            println!("   Completed: {}", stats.completed);
            println!("   Failed: {}", stats.failed);
            println!("   Total: {}", stats.total());
        }
        QueueAction::Errors => {
            let items = queue.get_recent_errors(QUEUE_LISTING_LIMIT).await?;
            println!("Recent failures ({}):", items.len());
            items.iter().for_each(print_queue_item);
        }
        QueueAction::Pending => {
            let items = queue.get_pending(QUEUE_LISTING_LIMIT).await?;
            println!("Pending items ({}):", items.len());
            items.iter().for_each(print_queue_item);
        }
        QueueAction::Completed => {
            let items = queue.get_recent_completed(QUEUE_LISTING_LIMIT).await?;
            println!("Recently completed ({}):", items.len());
            items.iter().for_each(print_queue_item);
        }
        QueueAction::Retry(id) => {
            let item = queue
                .retry(id)
                .await
                .with_context(|| format!("Failed to retry queue item {id}"))?;
            println!("🔄 Queue item #{} is {}", item.id, item.status);
        }
        QueueAction::RetryAll => {
            let count = queue.retry_all_errors().await?;
            println!("🔄 Returned {count} failed items to the queue");
        }
        QueueAction::Cleanup => {
            let count = queue.cleanup().await?;
            println!(
                "🧹 Removed {} finished items older than {} days",
                count,
                service.settings().queue.retention_days
            );
        }
    }

    Ok(())
}

#[inline]
pub async fn reindex_recipe(base_dir: &Path, recipe: &str) -> Result<()> {
    let service = open_service(base_dir).await?;
    let recipe_id = resolve_id(&service, recipe).await?;
    let item = service.reindex(recipe_id).await?;

    println!("🔄 Queued {} for enrichment (item #{})", recipe, item.id);
    Ok(())
}

/// Run the enrichment processor, either draining the queue once or until Ctrl+C.
#[inline]
pub async fn run_processor(base_dir: &Path, once: bool) -> Result<()> {
    let service = open_service(base_dir).await?;
    let processor = service.processor();

    if once {
        let report = processor
            .process_pending()
            .await
            .context("Enrichment processor could not start")?;
        println!(
            "✅ Processed queue: {} completed, {} failed",
            report.completed, report.failed
        );
        return Ok(());
    }

    let handle = Arc::clone(&processor)
        .start()
        .await
        .context("Enrichment processor could not start")?;
    println!("🍳 Enrichment processor running. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for interrupt signal: {}", e);
    }
    println!("\n📴 Received interrupt signal, shutting down...");
    handle.stop().await?;
    info!("Processor stopped");
    println!("✅ Shutdown complete");
    Ok(())
}

#[inline]
pub async fn check_consistency(base_dir: &Path) -> Result<()> {
    let service = open_service(base_dir).await?;
    let report = service.consistency().check().await?;

    println!("{}", report.summary());
    for issue in &report.issues {
        println!("  ⚠️  {} ({}): {}", issue.short_id, issue.recipe_id, issue.kind);
    }
    if report.stale_embeddings > 0 {
        println!(
            "  {} embeddings are waiting for newer versions to be enriched",
            report.stale_embeddings
        );
    }

    if report.is_consistent {
        Ok(())
    } else {
        Err(anyhow!("{} consistency issues found", report.total_issues()))
    }
}

#[inline]
pub async fn optimize_storage(base_dir: &Path) -> Result<()> {
    let service = open_service(base_dir).await?;
    service
        .optimize()
        .await
        .context("Failed to optimize storage")?;
    println!("✅ Database and vector store optimized");
    Ok(())
}
