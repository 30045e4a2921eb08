use super::*;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, database))
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' \
         AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> = [
        "recipes",
        "recipe_versions",
        "tags",
        "projects",
        "version_tags",
        "version_projects",
        "queue_items",
    ]
    .into_iter()
    .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn integration_reopen_keeps_data() -> Result<()> {
    let (temp_dir, database) = create_test_database().await?;
    let now = Utc::now().naive_utc();

    {
        let mut conn = database.acquire().await?;
        RecipeQueries::insert(&mut conn, "bread", "Bread", now).await?;
    }
    database.pool().close().await;

    let reopened = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let mut conn = reopened.acquire().await?;
    let recipe = RecipeQueries::get_by_short_id(&mut conn, "bread").await?;
    assert!(recipe.is_some());

    Ok(())
}

#[tokio::test]
async fn integration_optimize_keeps_data() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let now = Utc::now().naive_utc();

    {
        let mut conn = database.acquire().await?;
        RecipeQueries::insert(&mut conn, "bread", "Bread", now).await?;
        RecipeQueries::insert(&mut conn, "jam", "Jam", now).await?;
    }
    database.optimize().await?;

    let mut conn = database.acquire().await?;
    assert!(RecipeQueries::get_by_short_id(&mut conn, "bread").await?.is_some());
    assert!(RecipeQueries::get_by_short_id(&mut conn, "jam").await?.is_some());

    Ok(())
}

#[tokio::test]
async fn integration_transaction_rollback() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let now = Utc::now().naive_utc();

    {
        let mut tx = database.begin().await?;
        RecipeQueries::insert(&mut tx, "rolled-back", "Rolled Back", now).await?;
        tx.rollback().await?;
    }

    let mut conn = database.acquire().await?;
    let recipe = RecipeQueries::get_by_short_id(&mut conn, "rolled-back").await?;
    assert!(recipe.is_none());

    Ok(())
}

#[tokio::test]
async fn integration_live_short_id_is_unique() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let now = Utc::now().naive_utc();
    let mut conn = database.acquire().await?;

    let first = RecipeQueries::insert(&mut conn, "tacos", "Tacos", now).await?;
    let duplicate = RecipeQueries::insert(&mut conn, "TACOS", "Other Tacos", now).await;
    assert!(duplicate.is_err_and(|e| e.is_unique_violation()));

    // A deleted recipe frees its short id.
    RecipeQueries::mark_deleted(&mut conn, first, now).await?;
    RecipeQueries::insert(&mut conn, "tacos", "Tacos", now).await?;

    Ok(())
}
